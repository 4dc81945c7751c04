use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::auth::{require_session, session_middleware};

use super::analytics::{get_analytics, get_current_analytics};
use super::handlers::{
    chat, create_signup, get_session, health_check, sign_out, track_visit, AppState,
};
use super::middleware::resolve_client_ip;

pub fn create_api_router(state: Arc<AppState>) -> Router {
    let auth = Arc::clone(&state.auth);

    let dashboard_routes = Router::new()
        .route("/analytics", get(get_analytics))
        .route("/analytics/current", get(get_current_analytics))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&auth),
            require_session,
        ));

    let api_routes = Router::new()
        .route("/visits", post(track_visit))
        .route("/signups", post(create_signup))
        .route("/chat", post(chat))
        .route("/session", get(get_session))
        .route("/session/sign-out", post(sign_out))
        .merge(dashboard_routes)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            resolve_client_ip,
        ))
        .layer(middleware::from_fn_with_state(auth, session_middleware))
        .with_state(state);

    Router::new()
        .route("/api/health", get(health_check))
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}
