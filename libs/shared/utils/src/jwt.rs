use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use shared_models::auth::{JwtClaims, User};

type HmacSha256 = Hmac<Sha256>;

/// Verifies an HS256 token issued by the identity provider and returns the caller.
/// The clinic role comes from `app_metadata.role` when present.
pub fn validate_token(token: &str, jwt_secret: &str) -> Result<User, String> {
    if jwt_secret.is_empty() {
        return Err("JWT secret is not set".to_string());
    }

    let mut segments = token.split('.');
    let (header, payload, signature) = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(h), Some(p), Some(s), None) => (h, p, s),
        _ => return Err("Invalid token format".to_string()),
    };

    verify_signature(header, payload, signature, jwt_secret)?;
    let claims = decode_claims(payload)?;

    if let Some(exp) = claims.exp {
        let now = Utc::now().timestamp().max(0) as u64;
        if exp < now {
            debug!("Token for {} expired at {} (now {})", claims.sub, exp, now);
            return Err("Token expired".to_string());
        }
    }

    let created_at = claims.iat
        .and_then(|iat| i64::try_from(iat).ok())
        .and_then(|iat| Utc.timestamp_opt(iat, 0).single());
    let role = claims.clinic_role();

    debug!("Token accepted for user {}", claims.sub);
    Ok(User {
        id: claims.sub,
        email: claims.email,
        role,
        metadata: claims.user_metadata,
        created_at,
    })
}

fn verify_signature(header: &str, payload: &str, signature: &str, secret: &str) -> Result<(), String> {
    let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|e| {
        debug!("Signature is not base64url: {}", e);
        "Invalid signature encoding".to_string()
    })?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| "Failed to create HMAC".to_string())?;
    mac.update(header.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());

    mac.verify_slice(&signature).map_err(|_| {
        debug!("Token signature mismatch");
        "Invalid token signature".to_string()
    })
}

fn decode_claims(payload: &str) -> Result<JwtClaims, String> {
    let bytes = URL_SAFE_NO_PAD.decode(payload)
        .map_err(|_| "Invalid claims encoding".to_string())?;

    serde_json::from_slice(&bytes).map_err(|e| {
        debug!("Claims did not parse: {}", e);
        "Invalid claims format".to_string()
    })
}
