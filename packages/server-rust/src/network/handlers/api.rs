//! Entry point for everything under the API prefix.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tracing::debug;

use super::websocket::{open_session, SessionContext};
use crate::network::discovery::EndpointTable;
use crate::network::dispatcher::ApiDispatcher;

/// State behind the API prefix: the dispatcher and the endpoint table.
#[derive(Debug, Clone)]
pub struct ApiState {
    pub dispatcher: Arc<ApiDispatcher>,
    pub endpoints: Arc<EndpointTable>,
    pub sessions: SessionContext,
}

/// Builds the API router. The cross-origin policy is layered outside it, in
/// the transport stack.
pub fn api_router(state: ApiState) -> Router {
    Router::new().fallback(api_entry).with_state(state)
}

/// Upgrades on registered endpoint paths open a session; upgrades anywhere
/// else answer 404. Plain requests go to the dispatcher.
async fn api_entry(
    State(state): State<ApiState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    request: Request,
) -> Response {
    let Ok(upgrade) = upgrade else {
        return state.dispatcher.dispatch(request).await;
    };

    let path = request.uri().path();
    let Some(endpoint) = state.endpoints.get(path) else {
        debug!(path = %path, "upgrade requested on unregistered endpoint path");
        return StatusCode::NOT_FOUND.into_response();
    };

    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    open_session(upgrade, endpoint, path.to_string(), remote_addr, state.sessions.clone())
}
