pub mod analytics;
pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod models;
pub mod signup;
pub mod storage;

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use analytics::{locator_from_config, GeoLocator, StatsRefresher, VisitTracker};
use api::AppState;
use auth::AuthService;
use chat::{ChatCompletion, OpenAiChat};
use config::{Config, DatabaseBackend};
use signup::SignupService;
use storage::{PostgresStorage, SqliteStorage, Storage};

/// Open and initialize the configured database
pub async fn connect_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            Arc::new(
                SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
            )
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage: {}", config.database.url);
            Arc::new(
                PostgresStorage::new(&config.database.url, config.database.max_connections)
                    .await?,
            )
        }
    };

    info!("Initializing database...");
    storage.init().await?;
    info!("Database initialized successfully");

    Ok(storage)
}

/// Wire the services behind the API router
pub fn build_app_state(
    config: &Config,
    storage: Arc<dyn Storage>,
    auth: Arc<AuthService>,
) -> AppState {
    let locator: Option<Arc<dyn GeoLocator>> = match locator_from_config(&config.analytics) {
        Ok(locator) => Some(locator),
        Err(e) => {
            warn!("Geolocation disabled: {:#}", e);
            None
        }
    };

    let chat: Option<Arc<dyn ChatCompletion>> = match OpenAiChat::from_config(&config.chat) {
        Ok(chat) => Some(Arc::new(chat)),
        Err(e) => {
            warn!("AI chat disabled: {:#}", e);
            None
        }
    };

    AppState {
        tracker: VisitTracker::new(
            Arc::clone(&storage),
            locator,
            &config.tracking,
            config.analytics.ip_anonymization,
        ),
        signups: SignupService::new(Arc::clone(&storage)),
        chat,
        refresher: StatsRefresher::new(storage),
        auth,
        analytics_config: config.analytics.clone(),
    }
}
