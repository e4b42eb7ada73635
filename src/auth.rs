use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Unauthorized: No token provided")]
    MissingToken,
    #[error("Token expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId", alias = "id")]
    pub user_id: String,
    pub iat: u64,
    pub exp: u64,
}

/// The caller, as established by a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
}

#[derive(Clone)]
pub struct AuthKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl AuthKeys {
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    pub fn issue(&self, user_id: &str, ttl_secs: u64) -> anyhow::Result<String> {
        let now = Utc::now().timestamp().max(0) as u64;
        let claims = Claims { user_id: user_id.to_string(), iat: now, exp: now.saturating_add(ttl_secs) };
        Ok(jsonwebtoken::encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid,
            })?;
        if data.claims.user_id.is_empty() {
            return Err(AuthError::Invalid);
        }
        Ok(Identity { user_id: data.claims.user_id })
    }

    /// Accepts `Bearer <token>` as well as a bare token.
    pub fn verify_header(&self, header: Option<&str>) -> Result<Identity, AuthError> {
        let raw = header.map(str::trim).filter(|h| !h.is_empty()).ok_or(AuthError::MissingToken)?;
        let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
        self.verify(token)
    }
}

pub async fn require_auth(
    State(keys): State<Arc<AuthKeys>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = req.headers().get(AUTHORIZATION).and_then(|h| h.to_str().ok());
    let identity = keys.verify_header(header)?;
    tracing::debug!(user_id = %identity.user_id, "authenticated");
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> AuthKeys {
        AuthKeys::from_secret(b"test-secret")
    }

    #[test]
    fn issued_token_verifies_with_or_without_prefix() {
        let k = keys();
        let token = k.issue("user-42", 600).unwrap();
        assert_eq!(k.verify(&token).unwrap().user_id, "user-42");
        let with_prefix = format!("Bearer {}", token);
        assert_eq!(k.verify_header(Some(&with_prefix)).unwrap().user_id, "user-42");
        assert_eq!(k.verify_header(Some(&token)).unwrap().user_id, "user-42");
    }

    #[test]
    fn huge_ttl_saturates_instead_of_wrapping() {
        let k = keys();
        let token = k.issue("user-42", u64::MAX).unwrap();
        assert_eq!(k.verify(&token).unwrap().user_id, "user-42");
    }

    #[test]
    fn missing_header_is_rejected() {
        assert_eq!(keys().verify_header(None), Err(AuthError::MissingToken));
        assert_eq!(keys().verify_header(Some("  ")), Err(AuthError::MissingToken));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = AuthKeys::from_secret(b"other").issue("user-42", 600).unwrap();
        assert_eq!(keys().verify(&token), Err(AuthError::Invalid));
        assert_eq!(keys().verify("not-a-jwt"), Err(AuthError::Invalid));
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now().timestamp() as u64;
        let claims = Claims { user_id: "user-42".into(), iat: now - 7200, exp: now - 3600 };
        let token = jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret")).unwrap();
        assert_eq!(keys().verify(&token), Err(AuthError::Expired));
    }

    #[test]
    fn id_claim_is_accepted_as_user_id() {
        let now = Utc::now().timestamp() as u64;
        let claims = serde_json::json!({ "id": "legacy-user", "iat": now, "exp": now + 600 });
        let token = jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret")).unwrap();
        assert_eq!(keys().verify(&token).unwrap().user_id, "legacy-user");
    }
}
