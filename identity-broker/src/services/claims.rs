use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

pub type Claims = Map<String, Value>;

const EXPIRY_CLAIM: &str = "exp";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token signing secret must not be empty")]
    EmptySecret,

    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    #[error("invalid token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),
}

/// Issues and validates HS256 signed-claims tokens.
///
/// Validation only accepts HS256: tokens declaring any other algorithm
/// (RS*, ES*, other HMAC sizes) fail, and `none` does not even parse.
#[derive(Clone)]
pub struct ClaimsTokenService {
    keys: Arc<(EncodingKey, DecodingKey)>,
    validation: Validation,
}

impl ClaimsTokenService {
    pub fn new(secret: &[u8]) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&[EXPIRY_CLAIM]);

        Ok(Self {
            keys: Arc::new((
                EncodingKey::from_secret(secret),
                DecodingKey::from_secret(secret),
            )),
            validation,
        })
    }

    /// Sign `claims` with an `exp` of `expires_at` (Unix seconds).
    pub fn issue(&self, mut claims: Claims, expires_at: i64) -> Result<String, TokenError> {
        claims.insert(EXPIRY_CLAIM.to_string(), Value::from(expires_at));
        encode(&Header::new(Algorithm::HS256), &claims, &self.keys.0).map_err(TokenError::Signing)
    }

    /// Verify signature, algorithm and expiry; returns the business claims
    /// with `exp` removed.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let data =
            decode::<Claims>(token, &self.keys.1, &self.validation).map_err(TokenError::Invalid)?;
        let mut claims = data.claims;
        claims.remove(EXPIRY_CLAIM);
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn service(secret: &str) -> ClaimsTokenService {
        ClaimsTokenService::new(secret.as_bytes()).unwrap()
    }

    fn claims() -> Claims {
        let value = json!({ "sub": "user-1", "client_id": "c1", "scope": "openid" });
        value.as_object().unwrap().clone()
    }

    #[test]
    fn validate_returns_issued_claims_without_expiry() {
        let svc = service("test-secret");
        let token = svc.issue(claims(), Utc::now().timestamp() + 300).unwrap();
        assert_eq!(svc.validate(&token).unwrap(), claims());
    }

    #[test]
    fn expired_token_is_rejected() {
        let svc = service("test-secret");
        let token = svc.issue(claims(), Utc::now().timestamp() - 60).unwrap();
        assert!(matches!(svc.validate(&token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn garbage_is_rejected() {
        let svc = service("test-secret");
        for garbage in ["", "abc", "a.b.c", "eyJhbGciOiJIUzI1NiJ9.e30."] {
            assert!(svc.validate(garbage).is_err(), "accepted {:?}", garbage);
        }
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let token = service("secret-a")
            .issue(claims(), Utc::now().timestamp() + 300)
            .unwrap();
        assert!(service("secret-b").validate(&token).is_err());
    }

    #[test]
    fn other_hmac_algorithms_are_rejected() {
        let secret = b"test-secret";
        let mut payload = claims();
        payload.insert("exp".to_string(), json!(Utc::now().timestamp() + 300));
        let token = encode(
            &Header::new(Algorithm::HS512),
            &payload,
            &EncodingKey::from_secret(secret),
        )
        .unwrap();

        assert!(ClaimsTokenService::new(secret)
            .unwrap()
            .validate(&token)
            .is_err());
    }

    #[test]
    fn unsigned_tokens_are_rejected() {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(
            json!({ "sub": "user-1", "exp": Utc::now().timestamp() + 300 }).to_string(),
        );
        let token = format!("{}.{}.", header, body);
        assert!(service("test-secret").validate(&token).is_err());
    }

    #[test]
    fn missing_expiry_is_rejected() {
        let secret = b"test-secret";
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims(),
            &EncodingKey::from_secret(secret),
        )
        .unwrap();
        assert!(ClaimsTokenService::new(secret)
            .unwrap()
            .validate(&token)
            .is_err());
    }

    #[test]
    fn empty_secret_is_refused() {
        assert!(matches!(
            ClaimsTokenService::new(b""),
            Err(TokenError::EmptySecret)
        ));
    }
}
