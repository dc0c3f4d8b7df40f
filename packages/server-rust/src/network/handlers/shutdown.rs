//! Authenticated out-of-band shutdown control.
//!
//! `POST <path>?token=<secret>` with the configured secret answers 200 and
//! moves the server to Draining. Any other token, or none, answers 403 with
//! an empty body and changes nothing.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::error::ConfigurationError;
use crate::network::config::ShutdownConfig;
use crate::network::prefix::PathPrefix;
use crate::network::shutdown::LifecycleController;

/// The shutdown control path bound to a lifecycle controller.
#[derive(Debug)]
pub struct ShutdownControl {
    path: String,
    token: String,
    local_only: bool,
    lifecycle: Arc<LifecycleController>,
}

impl ShutdownControl {
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingShutdownToken`] when no non-empty
    /// token is configured, and [`ConfigurationError::InvalidPathPrefix`] when
    /// the control path is malformed or `/`.
    pub fn from_config(
        config: &ShutdownConfig,
        lifecycle: Arc<LifecycleController>,
    ) -> Result<Self, ConfigurationError> {
        let token = match config.token.as_deref() {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => return Err(ConfigurationError::MissingShutdownToken),
        };
        let path = PathPrefix::parse(&config.path)?;
        if path.is_root() {
            return Err(ConfigurationError::InvalidPathPrefix(config.path.clone()));
        }

        Ok(Self {
            path: path.as_str().to_string(),
            token,
            local_only: config.local_only,
            lifecycle,
        })
    }

    /// Whether this request is addressed to shutdown control.
    ///
    /// Only `POST` on the exact path qualifies; anything else falls through
    /// to the rest of the chain.
    #[must_use]
    pub fn claims(&self, method: &Method, path: &str) -> bool {
        method == Method::POST && path == self.path
    }

    /// Checks the presented token and, when enabled, the peer address.
    #[must_use]
    pub fn authorize(&self, query: Option<&str>, peer: Option<SocketAddr>) -> bool {
        if self.local_only && !peer.is_some_and(|addr| addr.ip().is_loopback()) {
            return false;
        }
        let Some(presented) = query.and_then(query_token) else {
            return false;
        };
        presented.as_bytes().ct_eq(self.token.as_bytes()).into()
    }

    /// Answers a shutdown request.
    pub fn respond(&self, request: &Request) -> Response {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);

        if !self.authorize(request.uri().query(), peer) {
            debug!(peer = ?peer, "rejected shutdown request");
            return (StatusCode::FORBIDDEN, Body::empty()).into_response();
        }

        info!(peer = ?peer, "shutdown requested");
        self.lifecycle.trigger_shutdown();
        (StatusCode::OK, Body::empty()).into_response()
    }
}

/// Extracts the first `token` parameter from a raw query string.
fn query_token(query: &str) -> Option<Cow<'_, str>> {
    query
        .split('&')
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .find(|(key, _)| *key == "token")
        .map(|(_, value)| percent_decode_str(value).decode_utf8_lossy())
}
