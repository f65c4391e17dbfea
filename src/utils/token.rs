use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::middleware::auth::Claims;

/// Sign an HS256 bearer token for `user_id`.
pub fn issue_token(
    secret: &str,
    user_id: Uuid,
    role: &str,
    caps: &[&str],
    ttl: Duration,
) -> Result<String> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now() + ttl).timestamp().max(0) as usize,
        role: Some(role.to_string()),
        caps: if caps.is_empty() {
            None
        } else {
            Some(caps.iter().map(|c| c.to_string()).collect())
        },
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| Error::Internal(format!("Failed to sign token: {}", e)))
}
