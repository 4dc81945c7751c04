use crate::models::{EmailSignup, NewVisit, VisitRecord};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

/// SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS page_visits (
                id BIGSERIAL PRIMARY KEY,
                page TEXT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL DEFAULT now(),
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
                id BIGSERIAL PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                source TEXT NOT NULL,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn record_visit(&self, visit: &NewVisit) -> Result<VisitRecord> {
        let timestamp = DateTime::parse_from_rfc3339(&visit.timestamp)
            .with_context(|| format!("invalid visit timestamp '{}'", visit.timestamp))?
            .with_timezone(&Utc);

        let row = sqlx::query_as::<_, VisitRecord>(
            r#"
            INSERT INTO page_visits
                (page, timestamp, user_id, ip_address, referrer, user_agent, country, city)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, page,
                to_char(timestamp AT TIME ZONE 'UTC', 'YYYY-MM-DD"T"HH24:MI:SS.MS"Z"') AS timestamp,
                user_id, ip_address, referrer, user_agent, country, city
            "#,
        )
        .bind(&visit.page)
        .bind(timestamp)
        .bind(&visit.user_id)
        .bind(&visit.ip_address)
        .bind(&visit.referrer)
        .bind(&visit.user_agent)
        .bind(&visit.country)
        .bind(&visit.city)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(row)
    }

    async fn visits_since(&self, since: DateTime<Utc>) -> Result<Vec<VisitRecord>> {
        let visits = sqlx::query_as::<_, VisitRecord>(
            r#"
            SELECT id, page,
                to_char(timestamp AT TIME ZONE 'UTC', 'YYYY-MM-DD"T"HH24:MI:SS.MS"Z"') AS timestamp,
                user_id, ip_address, referrer, user_agent, country, city
            FROM page_visits
            WHERE timestamp >= $1
            ORDER BY page_visits.timestamp ASC, id ASC
            "#,
        )
        .bind(since)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(visits)
    }

    async fn create_signup(&self, email: &str, source: &str) -> StorageResult<EmailSignup> {
        let created_at = Utc::now().timestamp();

        let result = sqlx::query_as::<_, EmailSignup>(
            r#"
            INSERT INTO email_signups (email, source, created_at)
            VALUES ($1, $2, $3)
            RETURNING id, email, source, created_at
            "#,
        )
        .bind(email)
        .bind(source)
        .bind(created_at)
        .fetch_one(self.pool.as_ref())
        .await;

        match result {
            Ok(signup) => Ok(signup),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                Err(StorageError::Conflict)
            }
            Err(e) => Err(StorageError::Other(e.into())),
        }
    }

    async fn list_signups(&self, limit: i64, offset: i64) -> Result<Vec<EmailSignup>> {
        let signups = sqlx::query_as::<_, EmailSignup>(
            r#"
            SELECT id, email, source, created_at
            FROM email_signups
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(signups)
    }
}
