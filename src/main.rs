use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mopsagent::auth::AuthService;
use mopsagent::config::{AuthMode, Config};
use mopsagent::{api, build_app_state, connect_storage};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    let storage = connect_storage(&config).await?;

    // Initialize auth service
    let auth_service = Arc::new(AuthService::new(config.auth.clone()).await?);

    match config.auth.mode {
        AuthMode::None => {
            info!("🔓 Authentication is disabled - all API requests are allowed");
        }
        AuthMode::Jwt => {
            if let Some(jwt) = config.auth.jwt.as_ref() {
                info!(
                    "🔐 Token authentication enabled (issuer: {}, audience: {})",
                    jwt.issuer_url, jwt.audience
                );
            }
        }
    }

    let state = Arc::new(build_app_state(&config, storage, auth_service));
    let router = api::create_api_router(state);

    let addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 API server listening on http://{}", addr);
    info!("   - API endpoints available at http://{}/api/...", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
