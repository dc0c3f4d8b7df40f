//! File-based stand-in for the Winery backend.
//!
//! [`StandaloneBackend`] owns a repository directory and registers the
//! components the launcher's host process relies on: a readiness resource at
//! the API root and placeholder realtime endpoints that hold their sessions
//! open until the client leaves.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderValue, Method};
use tracing::{debug, info};
use winery_launcher_core::{
    handler_fn, ApiResponse, Backend, ComponentCatalog, RealtimeEndpoint, Session,
};

const RESOURCES: &str = "winery::rest::resources";
const WEBSOCKETS: &str = "winery::rest::websockets";

/// Name and path of every placeholder realtime endpoint.
const PLACEHOLDER_ENDPOINTS: [(&str, &str); 4] = [
    ("git", "/git"),
    ("refineInstanceModel", "/refineInstanceModel"),
    ("refinetopology", "/refinetopology"),
    ("checkconsistency", "/checkconsistency"),
];

const READINESS_PAGE: &str = "<!DOCTYPE html>\n<html><head><title></title></head><body></body></html>\n";

/// Repository-directory backend used by the `winery-launcher` binary.
pub struct StandaloneBackend {
    repository_root: PathBuf,
    initialized: AtomicBool,
}

impl StandaloneBackend {
    #[must_use]
    pub fn new(repository_root: impl Into<PathBuf>) -> Self {
        Self {
            repository_root: repository_root.into(),
            initialized: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Backend for StandaloneBackend {
    fn name(&self) -> &str {
        "standalone"
    }

    /// Creates the repository directory if it does not exist yet.
    async fn initialize(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.repository_root)
            .await
            .map_err(|err| anyhow::anyhow!("cannot create repository {:?}: {err}", self.repository_root))?;
        self.initialized.store(true, Ordering::Release);
        info!(root = %self.repository_root.display(), "repository ready");
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn repository_root(&self) -> Option<PathBuf> {
        Some(self.repository_root.clone())
    }

    fn register_components(&self, catalog: &mut ComponentCatalog) -> anyhow::Result<()> {
        catalog.register_resource(
            RESOURCES,
            "root",
            [Method::GET],
            "/",
            handler_fn(|_request, _params| async { Ok(readiness_page()) }),
        )?;

        for (name, path) in PLACEHOLDER_ENDPOINTS {
            catalog.register_endpoint(WEBSOCKETS, name, move || {
                Ok(Arc::new(PlaceholderEndpoint { path }) as Arc<dyn RealtimeEndpoint>)
            })?;
        }
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.initialized.store(false, Ordering::Release);
        debug!("standalone backend closed");
        Ok(())
    }
}

fn readiness_page() -> ApiResponse {
    let mut response = http::Response::new(Bytes::from_static(READINESS_PAGE.as_bytes()));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

/// Accepts sessions and ignores their traffic until the client closes.
struct PlaceholderEndpoint {
    path: &'static str,
}

#[async_trait]
impl RealtimeEndpoint for PlaceholderEndpoint {
    fn path(&self) -> &str {
        self.path
    }

    async fn on_session(&self, mut session: Session) -> anyhow::Result<()> {
        let mut received = 0_usize;
        while session.recv().await.is_some() {
            received += 1;
        }
        debug!(path = self.path, session = session.id(), received, "placeholder session ended");
        Ok(())
    }
}
