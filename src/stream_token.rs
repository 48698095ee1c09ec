// stream_token.rs — short-lived HMAC-signed capability tokens for SSE access.
//
// Format: "{base64url(json)}.{base64url(hmac_sha256(json, secret))}"
// (base64url without padding). JSON keys: the caller's payload plus `exp`
// (unix seconds) and `nonce` (16 hex chars, so identical payloads never
// collide). Tokens are stateless: validity is signature + expiry only, no
// server-side revocation list. The scope is narrow (read access to one
// task's event stream) and the TTL is short.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Default stream-token lifetime.
pub const DEFAULT_TTL_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed stream token")]
    Malformed,
    #[error("stream token expired")]
    Expired,
    #[error("stream token signature invalid")]
    BadSignature,
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Random 16-hex-char nonce (UUID v4, truncated).
fn new_nonce() -> String {
    let mut hex = Uuid::new_v4().simple().to_string();
    hex.truncate(16);
    hex
}

fn sign(json: &[u8], secret: &str) -> Result<String, TokenError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| TokenError::BadSignature)?;
    mac.update(json);
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Issue a token carrying `payload` plus `exp` and `nonce`.
///
/// The payload is serialized as canonical JSON — serde_json's `Map` is
/// BTreeMap-backed, so keys come out sorted and the signature is stable.
/// With no secret the signature segment is empty; `validate_token` mirrors
/// that leniency. Callers should treat a missing secret as a dev-only setup.
///
/// Returns the token string and its expiry timestamp (unix seconds).
pub fn make_token(
    payload: &Map<String, Value>,
    ttl_secs: i64,
    secret: Option<&str>,
) -> Result<(String, i64), TokenError> {
    let exp = now_unix() + ttl_secs;
    let mut full = payload.clone();
    full.insert("exp".to_string(), Value::from(exp));
    full.insert("nonce".to_string(), Value::from(new_nonce()));

    let json = serde_json::to_string(&Value::Object(full)).map_err(|_| TokenError::Malformed)?;
    let body = URL_SAFE_NO_PAD.encode(json.as_bytes());
    let sig = match secret {
        Some(s) => sign(json.as_bytes(), s)?,
        None => String::new(),
    };
    Ok((format!("{body}.{sig}"), exp))
}

/// Validate a token and return its decoded payload.
///
/// Rejects anything that is not exactly two base64url segments, fails to
/// decode to a JSON object, is past `exp`, or carries a signature that does
/// not verify (constant-time) against the current secret. With no secret
/// configured, any well-formed token is accepted — mirroring issuance.
pub fn validate_token(token: &str, secret: Option<&str>) -> Result<Map<String, Value>, TokenError> {
    let mut parts = token.split('.');
    let (body_b64, sig_b64) = match (parts.next(), parts.next(), parts.next()) {
        (Some(body), Some(sig), None) => (body, sig),
        _ => return Err(TokenError::Malformed),
    };

    let json = URL_SAFE_NO_PAD
        .decode(body_b64)
        .map_err(|_| TokenError::Malformed)?;
    let payload: Value = serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)?;
    let Value::Object(payload) = payload else {
        return Err(TokenError::Malformed);
    };

    let exp = payload
        .get("exp")
        .and_then(Value::as_i64)
        .ok_or(TokenError::Malformed)?;
    if now_unix() > exp {
        return Err(TokenError::Expired);
    }

    if let Some(secret) = secret {
        let sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| TokenError::BadSignature)?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| TokenError::BadSignature)?;
        mac.update(&json);
        mac.verify_slice(&sig).map_err(|_| TokenError::BadSignature)?;
    }

    Ok(payload)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(task_id: i64) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("task_id".to_string(), json!(task_id));
        m
    }

    #[test]
    fn round_trip_preserves_payload() {
        let (token, exp) = make_token(&payload(5), 300, Some("s3cret")).unwrap();
        let decoded = validate_token(&token, Some("s3cret")).unwrap();
        assert_eq!(decoded.get("task_id").and_then(Value::as_i64), Some(5));
        assert_eq!(decoded.get("exp").and_then(Value::as_i64), Some(exp));
        assert_eq!(
            decoded.get("nonce").and_then(Value::as_str).map(str::len),
            Some(16)
        );
        assert!(exp > now_unix() + 290);
    }

    #[test]
    fn expired_token_rejected() {
        let (token, _) = make_token(&payload(1), -5, Some("k")).unwrap();
        assert_eq!(validate_token(&token, Some("k")), Err(TokenError::Expired));
    }

    #[test]
    fn wrong_secret_rejected() {
        let (token, _) = make_token(&payload(1), 60, Some("right")).unwrap();
        assert_eq!(
            validate_token(&token, Some("wrong")),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn malformed_tokens_rejected() {
        for bad in ["", "no-dot-here", "a.b.c", "!!!.???"] {
            assert_eq!(
                validate_token(bad, Some("k")),
                Err(TokenError::Malformed),
                "{bad:?} should be malformed"
            );
        }
    }

    #[test]
    fn unsigned_token_accepted_without_secret() {
        let (token, _) = make_token(&payload(9), 60, None).unwrap();
        assert!(token.ends_with('.'));
        let decoded = validate_token(&token, None).unwrap();
        assert_eq!(decoded.get("task_id").and_then(Value::as_i64), Some(9));
    }

    #[test]
    fn unsigned_token_rejected_once_secret_configured() {
        let (token, _) = make_token(&payload(9), 60, None).unwrap();
        assert_eq!(
            validate_token(&token, Some("k")),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn nonce_differs_across_identical_payloads() {
        let (a, _) = make_token(&payload(7), 60, Some("k")).unwrap();
        let (b, _) = make_token(&payload(7), 60, Some("k")).unwrap();
        assert_ne!(a, b);
    }
}
