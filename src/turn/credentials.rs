use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha1::Sha1;

/// Lifetime of a short-term credential, also advertised as `lifetimeDuration`.
pub const CREDENTIAL_TTL_SECS: i64 = 24 * 3600;

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnCredentials {
    pub username: String,
    pub password: String,
    pub expires_at: i64,
}

/// Derives short-term TURN credentials from a shared secret using the TURN
/// REST API scheme: `username = "<expiry>:<user>"`,
/// `password = base64(HMAC-SHA1(secret, username))`.
pub fn generate_turn_credentials(secret: &str, user: &str) -> Result<TurnCredentials, String> {
    generate_turn_credentials_at(secret, user, Utc::now().timestamp())
}

pub fn generate_turn_credentials_at(
    secret: &str,
    user: &str,
    now: i64,
) -> Result<TurnCredentials, String> {
    if secret.is_empty() {
        return Err("HMAC credentials require TURN_SHARED_SECRET".to_string());
    }

    let expires_at = now + CREDENTIAL_TTL_SECS;
    let username = format!("{}:{}", expires_at, user);

    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|e| format!("invalid TURN shared secret: {}", e))?;
    mac.update(username.as_bytes());
    let digest = mac.finalize().into_bytes();

    Ok(TurnCredentials {
        username,
        password: STANDARD.encode(digest),
        expires_at,
    })
}
