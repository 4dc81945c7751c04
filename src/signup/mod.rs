//! Launch-list email capture

use regex::Regex;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{error, info};

use crate::models::EmailSignup;
use crate::storage::{Storage, StorageError};

pub const DEFAULT_SOURCE: &str = "landing_page";
pub const SUCCESS_MESSAGE: &str = "Thanks! We'll keep you posted.";

#[derive(Debug, Error)]
pub enum SignupError {
    #[error("Please enter your email address")]
    Empty,
    #[error("Please enter a valid email address")]
    Invalid,
    #[error("This email is already signed up!")]
    AlreadySignedUp,
    #[error("Something went wrong. Please try again.")]
    Storage(#[source] anyhow::Error),
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"))
}

/// Trim, validate and lowercase an email address
pub fn normalize_email(raw: &str) -> Result<String, SignupError> {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return Err(SignupError::Empty);
    }

    if !email_pattern().is_match(trimmed) {
        return Err(SignupError::Invalid);
    }

    Ok(trimmed.to_lowercase())
}

#[derive(Clone)]
pub struct SignupService {
    storage: Arc<dyn Storage>,
}

impl SignupService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn sign_up(
        &self,
        email: &str,
        source: Option<&str>,
    ) -> Result<EmailSignup, SignupError> {
        let email = normalize_email(email)?;
        let source = source
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SOURCE);

        match self.storage.create_signup(&email, source).await {
            Ok(signup) => {
                info!(source, "new email signup");
                Ok(signup)
            }
            Err(StorageError::Conflict) => Err(SignupError::AlreadySignedUp),
            Err(StorageError::Other(e)) => {
                error!(error = ?e, "failed to store email signup");
                Err(SignupError::Storage(e))
            }
        }
    }
}
