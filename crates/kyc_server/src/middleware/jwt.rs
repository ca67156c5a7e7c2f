//! Bearer token authentication.
//!
//! Tokens are HS256 JWTs carrying `sub`, `roles` (primary first) and an
//! optional `email`. A validated token becomes a [`Principal`] request
//! extension; handlers never see the raw token.

use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use kyc_core::{principal::JwtClaims, KycError, Principal};

use crate::error::AppError;

#[derive(Clone)]
pub struct JwtConfig {
    key: DecodingKey,
    validation: Validation,
}

impl JwtConfig {
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// `None` when no bearer token was presented at all.
    pub fn authenticate(&self, headers: &HeaderMap) -> Option<Result<Principal, KycError>> {
        let token = bearer_token(headers)?;
        let principal = decode::<JwtClaims>(token, &self.key, &self.validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "bearer token rejected");
                KycError::Unauthenticated
            })
            .and_then(|data| Principal::from_jwt_claims(&data.claims));
        Some(principal)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn config_of(req: &Request) -> Result<JwtConfig, AppError> {
    req.extensions()
        .get::<JwtConfig>()
        .cloned()
        .ok_or_else(|| KycError::Internal(anyhow::anyhow!("JwtConfig extension missing")).into())
}

/// Required authentication: no valid bearer token, no entry.
pub async fn jwt_auth(mut req: Request, next: Next) -> Result<Response, AppError> {
    let config = config_of(&req)?;
    let principal = config
        .authenticate(req.headers())
        .unwrap_or(Err(KycError::Unauthenticated))?;
    tracing::debug!(actor = %principal.actor_id, "bearer authenticated");
    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// Optional authentication for session-scoped routes. A valid token attaches
/// a principal; a missing or invalid one leaves the request anonymous so the
/// session credentials can still admit it.
pub async fn optional_jwt(mut req: Request, next: Next) -> Result<Response, AppError> {
    let config = config_of(&req)?;
    match config.authenticate(req.headers()) {
        Some(Ok(principal)) => {
            req.extensions_mut().insert(principal);
        }
        Some(Err(_)) => {
            tracing::debug!(path = %req.uri().path(), "ignoring invalid bearer on session route");
        }
        None => {}
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        roles: Vec<String>,
        exp: usize,
    }

    fn headers_with(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
        headers
    }

    fn mint(secret: &[u8], exp: usize) -> String {
        let claims = TestClaims {
            sub: "checker-1".into(),
            roles: vec!["Checker".into()],
            exp,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn far_future() -> usize {
        (chrono::Utc::now().timestamp() + 3600) as usize
    }

    #[test]
    fn valid_token_yields_principal() {
        let config = JwtConfig::from_secret(b"secret");
        let headers = headers_with(&mint(b"secret", far_future()));
        let principal = config.authenticate(&headers).unwrap().unwrap();
        assert_eq!(principal.actor_id, "checker-1");
        assert_eq!(principal.primary_role(), Some("Checker"));
        assert!(principal.claims.contains_key("exp"));
    }

    #[test]
    fn wrong_secret_is_unauthenticated() {
        let config = JwtConfig::from_secret(b"secret");
        let headers = headers_with(&mint(b"other", far_future()));
        assert!(matches!(
            config.authenticate(&headers),
            Some(Err(KycError::Unauthenticated))
        ));
    }

    #[test]
    fn expired_token_is_unauthenticated() {
        let config = JwtConfig::from_secret(b"secret");
        let headers = headers_with(&mint(b"secret", 1_000));
        assert!(matches!(
            config.authenticate(&headers),
            Some(Err(KycError::Unauthenticated))
        ));
    }

    #[test]
    fn no_header_is_none() {
        let config = JwtConfig::from_secret(b"secret");
        assert!(config.authenticate(&HeaderMap::new()).is_none());
        let mut basic = HeaderMap::new();
        basic.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(config.authenticate(&basic).is_none());
    }
}
