use crate::error::AuthError;
use axum::http::{HeaderMap, header::AUTHORIZATION};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Claims carried by the identity provider's access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Verifies HS256 bearer tokens and resolves them to a user id.
#[derive(Clone)]
pub struct Authenticator {
    key: Arc<DecodingKey>,
    validation: Validation,
}

impl Authenticator {
    pub fn new(secret: &str, issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }

        Authenticator {
            key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Uuid, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            warn!("Rejected bearer token: {}", e);
            AuthError::from(e)
        })?;

        let user_id = Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::InvalidSubject)?;
        debug!(%user_id, "Bearer token accepted");
        Ok(user_id)
    }

    /// Requires a valid `Authorization: Bearer <token>` header.
    pub fn require_user(&self, headers: &HeaderMap) -> Result<Uuid, AuthError> {
        let token = bearer_token(headers)?;
        self.verify(token)
    }

    /// Like [`Authenticator::require_user`], but a missing header is not an error.
    pub fn optional_user(&self, headers: &HeaderMap) -> Result<Option<Uuid>, AuthError> {
        match bearer_token(headers) {
            Ok(token) => self.verify(token).map(Some),
            Err(AuthError::MissingToken) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader)?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or(AuthError::MalformedHeader)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::MalformedHeader);
    }
    Ok(token)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{EncodingKey, Header, encode};

    pub(crate) const SECRET: &str = "test-secret";

    pub(crate) fn token_for(user_id: Uuid, secret: &str, expires_in: i64) -> String {
        let exp = (chrono::Utc::now().timestamp() + expires_in).max(0) as u64;
        let claims = Claims {
            sub: user_id.to_string(),
            exp,
            iss: None,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn valid_token_resolves_user() {
        let auth = Authenticator::new(SECRET, None);
        let user_id = Uuid::new_v4();
        let headers = headers_with(&format!("Bearer {}", token_for(user_id, SECRET, 600)));

        assert_eq!(auth.require_user(&headers).unwrap(), user_id);
    }

    #[test]
    fn missing_header_is_optional_but_not_required() {
        let auth = Authenticator::new(SECRET, None);
        let headers = HeaderMap::new();

        assert!(matches!(auth.require_user(&headers), Err(AuthError::MissingToken)));
        assert!(auth.optional_user(&headers).unwrap().is_none());
    }

    #[test]
    fn wrong_scheme_is_malformed() {
        let auth = Authenticator::new(SECRET, None);

        let result = auth.require_user(&headers_with("Basic dXNlcjpwYXNz"));

        assert!(matches!(result, Err(AuthError::MalformedHeader)));
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let auth = Authenticator::new(SECRET, None);
        let token = token_for(Uuid::new_v4(), "another-secret", 600);

        assert!(matches!(auth.verify(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let auth = Authenticator::new(SECRET, None);
        let token = token_for(Uuid::new_v4(), SECRET, -3600);

        assert!(matches!(auth.verify(&token), Err(AuthError::ExpiredToken)));
    }
}
