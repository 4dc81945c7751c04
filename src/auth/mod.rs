//! Session resolution for API requests
//!
//! Every request gets an explicit [`SessionContext`]: anonymous when no
//! bearer token is presented (or auth is disabled), authenticated when the
//! token validates. Sign-out revokes the token for the rest of its lifetime.

pub mod jwt;
pub mod session;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{AuthConfig, AuthMode};

pub use jwt::{AccessClaims, JwtValidator};
pub use session::{SessionContext, SessionUser};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid access token")]
    InvalidToken(#[source] anyhow::Error),
    #[error("session has been signed out")]
    Revoked,
    #[error("authentication required")]
    Required,
}

pub struct AuthService {
    mode: AuthMode,
    validator: Option<JwtValidator>,
    /// Token fingerprint -> expiry (Unix seconds) of signed-out tokens
    revoked: DashMap<String, i64>,
}

impl AuthService {
    pub async fn new(config: AuthConfig) -> anyhow::Result<Self> {
        let validator = match (&config.mode, &config.jwt) {
            (AuthMode::Jwt, Some(jwt)) => Some(JwtValidator::from_config(jwt).await?),
            (AuthMode::Jwt, None) => {
                anyhow::bail!("AUTH_MODE=jwt requires token validation settings")
            }
            (AuthMode::None, _) => None,
        };

        Ok(Self {
            mode: config.mode,
            validator,
            revoked: DashMap::new(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.mode, AuthMode::Jwt)
    }

    /// Resolve the session for an optional bearer token
    pub async fn resolve(&self, token: Option<&str>) -> Result<SessionContext, AuthError> {
        let (Some(validator), Some(token)) = (self.validator.as_ref(), token) else {
            return Ok(SessionContext::anonymous());
        };

        let fingerprint = fingerprint(token);
        if self.revoked.contains_key(&fingerprint) {
            return Err(AuthError::Revoked);
        }

        let claims = validator
            .validate(token)
            .await
            .map_err(AuthError::InvalidToken)?;

        Ok(SessionContext::authenticated(
            SessionUser {
                id: claims.sub,
                email: claims.email,
            },
            fingerprint,
            claims.exp,
        ))
    }

    /// Revoke the session's token and clear the context
    pub fn sign_out(&self, session: &mut SessionContext) -> bool {
        self.prune_revoked();

        let revoked = match (session.token_fingerprint(), session.expires_at()) {
            (Some(fingerprint), Some(expires_at)) => {
                self.revoked.insert(fingerprint.to_string(), expires_at);
                info!(user_id = ?session.user_id(), "session signed out");
                true
            }
            _ => false,
        };

        session.clear();
        revoked
    }

    /// Forget revocations whose tokens have expired anyway
    fn prune_revoked(&self) {
        let now = Utc::now().timestamp();
        self.revoked.retain(|_, expires_at| *expires_at > now);
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }
}

fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn unauthorized(err: &AuthError) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

/// Attach a [`SessionContext`] extension to every request.
///
/// A token that does not resolve leaves the request anonymous; routes that
/// need a user sit behind [`require_session`].
pub async fn session_middleware(
    State(auth): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    // Owned copy: the request body is not Sync, so no borrow may cross the await
    let token = bearer_token(&request).map(str::to_string);

    let session = match auth.resolve(token.as_deref()).await {
        Ok(session) => session,
        Err(err) => {
            debug!(error = ?err, "continuing anonymously with unusable token");
            SessionContext::anonymous()
        }
    };

    request.extensions_mut().insert(session);
    next.run(request).await
}

/// Reject anonymous requests when authentication is enabled
pub async fn require_session(
    State(auth): State<Arc<AuthService>>,
    request: Request,
    next: Next,
) -> Response {
    let authenticated = request
        .extensions()
        .get::<SessionContext>()
        .is_some_and(SessionContext::is_authenticated);

    if auth.is_enabled() && !authenticated {
        return unauthorized(&AuthError::Required);
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::Value;

    const SECRET: &str = "super-secret-jwt-token-with-at-least-32-characters";
    const ISSUER: &str = "https://project.supabase.co/auth/v1";

    async fn jwt_service() -> AuthService {
        AuthService::new(AuthConfig {
            mode: AuthMode::Jwt,
            jwt: Some(JwtConfig {
                issuer_url: ISSUER.to_string(),
                audience: "authenticated".to_string(),
                jwks_url: None,
                shared_secret: Some(SECRET.to_string()),
                jwks_cache_ttl_secs: 300,
            }),
        })
        .await
        .unwrap()
    }

    fn token(claims: Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn valid_claims() -> Value {
        serde_json::json!({
            "sub": "user-123",
            "email": "ops@example.com",
            "iss": ISSUER,
            "aud": "authenticated",
            "exp": Utc::now().timestamp() + 3600,
        })
    }

    #[tokio::test]
    async fn test_disabled_auth_is_anonymous() {
        let service = AuthService::new(AuthConfig {
            mode: AuthMode::None,
            jwt: None,
        })
        .await
        .unwrap();

        let session = service.resolve(Some("whatever")).await.unwrap();
        assert!(!session.is_authenticated());
        assert!(!service.is_enabled());
    }

    #[tokio::test]
    async fn test_valid_token_resolves_user() {
        let service = jwt_service().await;
        let session = service.resolve(Some(&token(valid_claims()))).await.unwrap();

        let user = session.user().unwrap();
        assert_eq!(user.id, "user-123");
        assert_eq!(user.email.as_deref(), Some("ops@example.com"));
    }

    #[tokio::test]
    async fn test_missing_token_is_anonymous() {
        let service = jwt_service().await;
        let session = service.resolve(None).await.unwrap();
        assert_eq!(session, SessionContext::anonymous());
    }

    #[tokio::test]
    async fn test_wrong_issuer_or_audience_rejected() {
        let service = jwt_service().await;

        let mut claims = valid_claims();
        claims["iss"] = Value::String("https://evil.example".to_string());
        assert!(matches!(
            service.resolve(Some(&token(claims))).await,
            Err(AuthError::InvalidToken(_))
        ));

        let mut claims = valid_claims();
        claims["aud"] = Value::String("anon".to_string());
        assert!(service.resolve(Some(&token(claims))).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let service = jwt_service().await;
        let mut claims = valid_claims();
        claims["exp"] = Value::from(Utc::now().timestamp() - 3600);
        assert!(service.resolve(Some(&token(claims))).await.is_err());
    }

    #[tokio::test]
    async fn test_sign_out_revokes_token() {
        let service = jwt_service().await;
        let token = token(valid_claims());

        let mut session = service.resolve(Some(&token)).await.unwrap();
        assert!(service.sign_out(&mut session));
        assert!(!session.is_authenticated());
        assert_eq!(service.revoked_count(), 1);

        assert!(matches!(
            service.resolve(Some(&token)).await,
            Err(AuthError::Revoked)
        ));
    }

    #[tokio::test]
    async fn test_sign_out_anonymous_is_noop() {
        let service = jwt_service().await;
        let mut session = SessionContext::anonymous();
        assert!(!service.sign_out(&mut session));
        assert_eq!(service.revoked_count(), 0);
    }
}
