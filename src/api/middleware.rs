use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use super::handlers::AppState;
use crate::analytics::extract_client_ip;

/// Client address resolved from the connection and trusted proxy headers
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub Option<IpAddr>);

pub async fn resolve_client_ip(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let socket_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let client_ip = extract_client_ip(request.headers(), socket_ip, &state.analytics_config);
    request.extensions_mut().insert(ClientIp(client_ip));
    next.run(request).await
}
