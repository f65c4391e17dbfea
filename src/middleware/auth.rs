use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::models::viewer::{Capabilities, Viewer};
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub role: Option<String>,
    /// Capabilities granted on top of the role's defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caps: Option<Vec<String>>,
}

impl Claims {
    pub fn viewer(&self) -> Option<Viewer> {
        let user_id = Uuid::parse_str(&self.sub).ok()?;
        let role = self.role.clone().unwrap_or_default();
        let mut caps = Capabilities::for_role(&role);
        for name in self.caps.iter().flatten() {
            caps.grant(name);
        }
        Some(Viewer {
            user_id,
            role,
            caps,
        })
    }
}

fn unauthorized(code: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": code }))).into_response()
}

/// Verify the bearer token and attach the `Viewer` to the request.
pub async fn require_bearer_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(auth_header) = req.headers().get(axum::http::header::AUTHORIZATION) else {
        return unauthorized("missing_authorization");
    };
    let Ok(auth_str) = auth_header.to_str() else {
        return unauthorized("bad_authorization");
    };
    let Some(token) = auth_str.strip_prefix("Bearer ") else {
        return unauthorized("unsupported_scheme");
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let claims = match decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &validation,
    ) {
        Ok(data) => data.claims,
        Err(e) => {
            tracing::debug!("rejected bearer token: {}", e);
            return unauthorized("invalid_token");
        }
    };

    let Some(viewer) = claims.viewer() else {
        return unauthorized("invalid_subject");
    };
    req.extensions_mut().insert(viewer);
    next.run(req).await
}
