//! Bearer-token admission for WebSocket clients

use axum::http::{header, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// Lifetime of tokens issued by [`JwtAuth::issue_token`]
pub const TOKEN_LIFETIME_HOURS: i64 = 72;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,

    #[error("JWT_SECRET is not set")]
    MissingSecret,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("token carries no user id")]
    MissingSubject,
}

/// Maps a credential to the user it identifies
pub trait IdentityExtractor: Send + Sync {
    fn extract_user_id(&self, credential: &str) -> Result<UserId, AuthError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: usize,
}

/// HS256 JWT validation
#[derive(Clone)]
pub struct JwtAuth {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuth {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Load the signing secret from JWT_SECRET
    pub fn from_env() -> Result<Self, AuthError> {
        let secret = std::env::var("JWT_SECRET")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingSecret)?;
        Ok(Self::new(secret.as_bytes()))
    }

    pub fn issue_token(&self, user_id: &str, email: Option<&str>) -> Result<String, AuthError> {
        let exp = Utc::now() + Duration::hours(TOKEN_LIFETIME_HOURS);
        let claims = Claims {
            user_id: user_id.to_string(),
            email: email.map(str::to_string),
            exp: exp.timestamp() as usize,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(data.claims)
    }
}

impl IdentityExtractor for JwtAuth {
    fn extract_user_id(&self, credential: &str) -> Result<UserId, AuthError> {
        let claims = self.validate_token(credential)?;
        if claims.user_id.trim().is_empty() {
            return Err(AuthError::MissingSubject);
        }
        Ok(claims.user_id)
    }
}

/// Pick the credential from `Authorization: Bearer ...`, falling back to the `token` query parameter
pub fn credential_from_request(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    bearer
        .or_else(|| query_token.map(str::trim).filter(|t| !t.is_empty()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serial_test::serial;

    #[test]
    fn test_token_roundtrip() {
        let auth = JwtAuth::new(b"test-secret");
        let token = auth.issue_token("user-1", Some("a@example.com")).unwrap();

        let claims = auth.validate_token(&token).unwrap();
        assert_eq!(claims.user_id, "user-1");
        assert_eq!(claims.email.as_deref(), Some("a@example.com"));
        assert_eq!(auth.extract_user_id(&token).unwrap(), "user-1");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = JwtAuth::new(b"one").issue_token("user-1", None).unwrap();
        let result = JwtAuth::new(b"two").extract_user_id(&token);
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_garbage_and_expired_rejected() {
        let auth = JwtAuth::new(b"test-secret");
        assert!(auth.extract_user_id("not.a.jwt").is_err());

        let claims = Claims {
            user_id: "user-1".to_string(),
            email: None,
            exp: (Utc::now() - Duration::hours(1)).timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &auth.encoding).unwrap();
        assert!(matches!(
            auth.extract_user_id(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_empty_user_id_rejected() {
        let auth = JwtAuth::new(b"test-secret");
        let token = auth.issue_token("  ", None).unwrap();
        assert!(matches!(
            auth.extract_user_id(&token),
            Err(AuthError::MissingSubject)
        ));
    }

    #[test]
    fn test_credential_from_request() {
        let mut headers = HeaderMap::new();
        assert_eq!(credential_from_request(&headers, None), None);
        assert_eq!(
            credential_from_request(&headers, Some("q-token")).as_deref(),
            Some("q-token")
        );
        assert_eq!(credential_from_request(&headers, Some("")), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer h-token"));
        assert_eq!(
            credential_from_request(&headers, Some("q-token")).as_deref(),
            Some("h-token")
        );

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(
            credential_from_request(&headers, Some("q-token")).as_deref(),
            Some("q-token")
        );
    }

    #[test]
    #[serial]
    fn test_from_env_requires_secret() {
        std::env::remove_var("JWT_SECRET");
        assert!(matches!(JwtAuth::from_env(), Err(AuthError::MissingSecret)));

        std::env::set_var("JWT_SECRET", "s3cret");
        assert!(JwtAuth::from_env().is_ok());
        std::env::remove_var("JWT_SECRET");
    }
}
