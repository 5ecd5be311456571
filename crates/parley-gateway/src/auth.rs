use jsonwebtoken::{DecodingKey, Validation, decode, errors::ErrorKind};
use thiserror::Error;

use parley_types::api::Claims;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing credential")]
    Missing,
    #[error("malformed credential")]
    Malformed,
    #[error("credential expired")]
    Expired,
    #[error("invalid signature")]
    InvalidSignature,
}

/// Validates a bearer token and yields the embedded identity. Shared by
/// the REST middleware and the WebSocket handshake; no side effects.
#[derive(Clone)]
pub struct AuthVerifier {
    decoding: DecodingKey,
    validation: Validation,
}

impl AuthVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::Malformed,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use uuid::Uuid;

    fn token(secret: &str, exp_offset_secs: i64) -> String {
        let claims = Claims {
            sub: Uuid::new_v4(),
            username: "alice".into(),
            exp: (chrono::Utc::now() + chrono::Duration::seconds(exp_offset_secs)).timestamp()
                as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_a_valid_token() {
        let verifier = AuthVerifier::new("s3cret");
        let claims = verifier.verify(&token("s3cret", 3600)).unwrap();
        assert_eq!(claims.username, "alice");
    }

    #[test]
    fn rejects_missing_and_garbage_tokens() {
        let verifier = AuthVerifier::new("s3cret");
        assert_eq!(verifier.verify(""), Err(AuthError::Missing));
        assert_eq!(verifier.verify("not-a-jwt"), Err(AuthError::Malformed));
    }

    #[test]
    fn rejects_expired_token() {
        let verifier = AuthVerifier::new("s3cret");
        assert_eq!(
            verifier.verify(&token("s3cret", -3600)),
            Err(AuthError::Expired)
        );
    }

    #[test]
    fn rejects_wrong_secret() {
        let verifier = AuthVerifier::new("s3cret");
        assert_eq!(
            verifier.verify(&token("other", 3600)),
            Err(AuthError::InvalidSignature)
        );
    }
}
