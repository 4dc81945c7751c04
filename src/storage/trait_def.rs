use crate::models::{EmailSignup, NewVisit, VisitRecord};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("email is already signed up")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Canonical text form for stored visit timestamps.
///
/// Fixed-width UTC with millisecond precision so that lexical order in the
/// SQLite column matches chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (run migrations, etc.)
    async fn init(&self) -> Result<()>;

    /// Insert one page visit row
    async fn record_visit(&self, visit: &NewVisit) -> Result<VisitRecord>;

    /// All visits with `timestamp >= since`, oldest first
    async fn visits_since(&self, since: DateTime<Utc>) -> Result<Vec<VisitRecord>>;

    /// Insert an email signup; a duplicate email yields `StorageError::Conflict`
    async fn create_signup(&self, email: &str, source: &str) -> StorageResult<EmailSignup>;

    /// List signups, newest first
    async fn list_signups(&self, limit: i64, offset: i64) -> Result<Vec<EmailSignup>>;
}
