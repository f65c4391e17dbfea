use std::net::IpAddr;
use std::str::FromStr;

use sqlx::types::ipnetwork::IpNetwork;

use crate::models::quiz::Quiz;
use crate::services::access_rules::DenialReason;
use crate::utils::crypto::verify_password;

/// What the user supplied when asking to start an attempt.
#[derive(Debug, Clone, Default)]
pub struct PreflightInput {
    pub password: Option<String>,
    pub client_ip: Option<IpAddr>,
}

/// Check the password and subnet restrictions of `quiz`.
///
/// Runs on every attempt-start request; nothing about the outcome is remembered.
/// Returns every failing condition, so an empty list means the checks passed.
pub fn run_preflight(quiz: &Quiz, input: &PreflightInput) -> Vec<DenialReason> {
    let mut reasons = Vec::new();

    if let Some(hash) = quiz.password_hash.as_deref().filter(|h| !h.trim().is_empty()) {
        match input.password.as_deref().filter(|p| !p.is_empty()) {
            None => reasons.push(DenialReason::PasswordRequired),
            Some(given) => match verify_password(given, hash) {
                Ok(true) => {}
                Ok(false) => reasons.push(DenialReason::PasswordIncorrect),
                Err(e) => {
                    tracing::error!(quiz_id = %quiz.id, "stored quiz password hash is unreadable: {}", e);
                    reasons.push(DenialReason::PasswordIncorrect);
                }
            },
        }
    }

    if let Some(subnet) = quiz.subnet.as_deref().filter(|s| !s.trim().is_empty()) {
        match input.client_ip {
            None => reasons.push(DenialReason::AddressUnknown),
            Some(ip) if !address_in_subnets(ip, subnet) => {
                reasons.push(DenialReason::SubnetRejected)
            }
            Some(_) => {}
        }
    }

    reasons
}

/// `subnets` is a comma separated list of CIDR networks or single addresses.
/// Entries that do not parse are skipped.
pub fn address_in_subnets(ip: IpAddr, subnets: &str) -> bool {
    subnets
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match IpNetwork::from_str(s) {
            Ok(net) => Some(net),
            Err(_) => {
                tracing::warn!("ignoring malformed subnet entry '{}'", s);
                None
            }
        })
        .any(|net| net.contains(ip))
}
