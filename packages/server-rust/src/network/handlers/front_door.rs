//! The single fallback handler that routes every request by priority.
//!
//! 1. `POST` on the shutdown control path
//! 2. anything under the API prefix
//! 3. the static mounts, longest prefix first
//!
//! A request matching none of these answers 404.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use tower::ServiceExt;

use super::shutdown::ShutdownControl;
use crate::network::mounts::MountTable;
use crate::network::prefix::PathPrefix;

/// Shared application state passed to the front door via `State` extraction.
///
/// Holds `Arc` references and a cloneable router so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub shutdown: Arc<ShutdownControl>,
    pub api_prefix: PathPrefix,
    pub api: Router,
    pub mounts: Arc<MountTable>,
}

pub async fn front_door(State(state): State<AppState>, request: Request) -> Response {
    let path = request.uri().path();

    if state.shutdown.claims(request.method(), path) {
        return state.shutdown.respond(&request);
    }

    if state.api_prefix.strip(path).is_some() {
        return match state.api.oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
    }

    state.mounts.serve(request).await
}
