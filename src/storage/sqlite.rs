use crate::models::{EmailSignup, NewVisit, VisitRecord};
use crate::storage::{format_timestamp, Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS page_visits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                page TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                user_id TEXT,
                ip_address TEXT,
                referrer TEXT,
                user_agent TEXT,
                country TEXT,
                city TEXT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_page_visits_timestamp ON page_visits(timestamp)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS email_signups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                source TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn record_visit(&self, visit: &NewVisit) -> Result<VisitRecord> {
        let result = sqlx::query(
            r#"
            INSERT INTO page_visits
                (page, timestamp, user_id, ip_address, referrer, user_agent, country, city)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&visit.page)
        .bind(&visit.timestamp)
        .bind(&visit.user_id)
        .bind(&visit.ip_address)
        .bind(&visit.referrer)
        .bind(&visit.user_agent)
        .bind(&visit.country)
        .bind(&visit.city)
        .execute(self.pool.as_ref())
        .await?;

        Ok(VisitRecord {
            id: result.last_insert_rowid(),
            page: visit.page.clone(),
            timestamp: visit.timestamp.clone(),
            user_id: visit.user_id.clone(),
            ip_address: visit.ip_address.clone(),
            referrer: visit.referrer.clone(),
            user_agent: visit.user_agent.clone(),
            country: visit.country.clone(),
            city: visit.city.clone(),
        })
    }

    async fn visits_since(&self, since: DateTime<Utc>) -> Result<Vec<VisitRecord>> {
        let visits = sqlx::query_as::<_, VisitRecord>(
            r#"
            SELECT id, page, timestamp, user_id, ip_address, referrer, user_agent, country, city
            FROM page_visits
            WHERE timestamp >= ?
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(format_timestamp(since))
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(visits)
    }

    async fn create_signup(&self, email: &str, source: &str) -> StorageResult<EmailSignup> {
        let created_at = Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO email_signups (email, source, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(email) DO NOTHING
            "#,
        )
        .bind(email)
        .bind(source)
        .bind(created_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        Ok(EmailSignup {
            id: result.last_insert_rowid(),
            email: email.to_string(),
            source: source.to_string(),
            created_at,
        })
    }

    async fn list_signups(&self, limit: i64, offset: i64) -> Result<Vec<EmailSignup>> {
        let signups = sqlx::query_as::<_, EmailSignup>(
            r#"
            SELECT id, email, source, created_at
            FROM email_signups
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(signups)
    }
}
