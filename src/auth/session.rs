use serde::Serialize;

/// Authenticated user as described by the access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionUser {
    pub id: String,
    pub email: Option<String>,
}

/// Per-request session, resolved from the bearer token and handed to
/// handlers explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    user: Option<SessionUser>,
    /// SHA-256 of the access token, used to revoke it on sign-out
    token_fingerprint: Option<String>,
    /// Token expiry (Unix seconds)
    expires_at: Option<i64>,
}

impl SessionContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(user: SessionUser, token_fingerprint: String, expires_at: i64) -> Self {
        Self {
            user: Some(user),
            token_fingerprint: Some(token_fingerprint),
            expires_at: Some(expires_at),
        }
    }

    pub fn user(&self) -> Option<&SessionUser> {
        self.user.as_ref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn token_fingerprint(&self) -> Option<&str> {
        self.token_fingerprint.as_deref()
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    /// Drop the user; the context is anonymous afterwards
    pub fn clear(&mut self) {
        *self = Self::anonymous();
    }
}
