use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_PREFIX: &str = "sk_swarm_";
const API_KEY_MIN_LEN: usize = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    Missing,
    Malformed,
    BadSignature,
    Expired,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            AuthError::Missing => "missing credentials",
            AuthError::Malformed => "malformed credentials",
            AuthError::BadSignature => "invalid signature",
            AuthError::Expired => "token expired",
        };
        write!(f, "{text}")
    }
}

impl std::error::Error for AuthError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

fn sign(secret: &str, message: &str) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(message.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Three-segment signed token: base64url(header).base64url(claims) signed
/// with HMAC-SHA256 over the first two segments.
pub fn mint_token(secret: &str, sub: &str, ttl_secs: i64, scope: &[String]) -> String {
    let header = URL_SAFE_NO_PAD.encode(json!({"alg": "HS256", "typ": "JWT"}).to_string());
    let now = Utc::now().timestamp();
    let claims = TokenClaims {
        sub: sub.to_string(),
        iat: now,
        exp: now + ttl_secs,
        scope: scope.to_vec(),
        device: None,
    };
    let payload =
        URL_SAFE_NO_PAD.encode(serde_json::to_string(&claims).expect("claims serialize"));
    let signing_input = format!("{header}.{payload}");
    let signature = URL_SAFE_NO_PAD.encode(sign(secret, &signing_input));
    format!("{signing_input}.{signature}")
}

pub fn verify_token(secret: &str, token: &str) -> Result<TokenClaims, AuthError> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(AuthError::Malformed);
    };

    let signing_input = format!("{header}.{payload}");
    let provided = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| AuthError::Malformed)?;
    let expected = sign(secret, &signing_input);
    if !constant_time_eq(&provided, &expected) {
        return Err(AuthError::BadSignature);
    }

    let claims_raw = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AuthError::Malformed)?;
    let claims: TokenClaims =
        serde_json::from_slice(&claims_raw).map_err(|_| AuthError::Malformed)?;
    if claims.exp <= Utc::now().timestamp() {
        return Err(AuthError::Expired);
    }
    Ok(claims)
}

/// API keys are validated by shape only; scope checks live with the issuer.
pub fn is_valid_api_key(key: &str) -> bool {
    key.starts_with(API_KEY_PREFIX) && key.len() >= API_KEY_MIN_LEN
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_tokens_verify_and_carry_claims() {
        let token = mint_token("secret", "cli-user", 3600, &["tasks".to_string()]);
        assert_eq!(token.split('.').count(), 3);
        let claims = verify_token("secret", &token).expect("verify");
        assert_eq!(claims.sub, "cli-user");
        assert_eq!(claims.scope, vec!["tasks"]);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let token = mint_token("secret", "cli-user", -10, &[]);
        assert_eq!(verify_token("secret", &token), Err(AuthError::Expired));
    }

    #[test]
    fn wrong_secret_fails_the_signature_check() {
        let token = mint_token("secret", "cli-user", 3600, &[]);
        assert_eq!(
            verify_token("other-secret", &token),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn truncated_tokens_are_malformed() {
        assert_eq!(
            verify_token("secret", "one.two"),
            Err(AuthError::Malformed)
        );
        assert_eq!(
            verify_token("secret", "not-a-token"),
            Err(AuthError::Malformed)
        );
    }

    #[test]
    fn tampered_payloads_fail_verification() {
        let token = mint_token("secret", "cli-user", 3600, &[]);
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(
            json!({"sub": "intruder", "iat": 0, "exp": 9999999999i64}).to_string(),
        );
        parts[1] = &forged;
        let tampered = parts.join(".");
        assert_eq!(
            verify_token("secret", &tampered),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn api_key_shape_check() {
        assert!(is_valid_api_key("sk_swarm_0123456789abcdef0123"));
        assert!(!is_valid_api_key("sk_swarm_short"));
        assert!(!is_valid_api_key("sk_other_0123456789abcdef0123"));
    }
}
