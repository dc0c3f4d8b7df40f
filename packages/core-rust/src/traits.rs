use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::catalog::ComponentCatalog;
use crate::route::PathParams;
use crate::session::Session;

/// Request handed to a resource handler, with the body fully buffered.
pub type ApiRequest = http::Request<Bytes>;

/// Response produced by a resource handler.
pub type ApiResponse = http::Response<Bytes>;

/// A backend REST resource handler.
///
/// The launcher routes to it; everything behind `handle` belongs to the backend.
#[async_trait]
pub trait ApiHandler: Send + Sync {
    /// Handle a request whose path matched this handler's route template.
    async fn handle(&self, request: ApiRequest, params: PathParams) -> anyhow::Result<ApiResponse>;
}

/// Realtime message endpoint, bound to one path and served over upgraded connections.
#[async_trait]
pub trait RealtimeEndpoint: Send + Sync {
    /// Path this endpoint advertises, relative to the API prefix (e.g. `/git`).
    fn path(&self) -> &str;

    /// Drive one accepted session until it ends.
    ///
    /// Runs on its own task; returning (or erroring) closes the channel.
    async fn on_session(&self, session: Session) -> anyhow::Result<()>;
}

/// The external backend application the launcher boots and exposes.
/// Implementations: the bundled standalone file-based stand-in, test doubles.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable backend name, used in logs.
    fn name(&self) -> &str;

    /// One-time initialization (e.g., open or create the repository).
    async fn initialize(&self) -> anyhow::Result<()>;

    /// Whether `initialize()` has completed successfully.
    fn is_initialized(&self) -> bool;

    /// Root directory of a file-based repository. `None` for other kinds.
    fn repository_root(&self) -> Option<PathBuf>;

    /// Register this backend's resource handlers and realtime endpoints.
    fn register_components(&self, catalog: &mut ComponentCatalog) -> anyhow::Result<()>;

    /// Release resources after the server has stopped.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Adapts an async closure into an [`ApiHandler`].
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ApiHandler for HandlerFn<F>
where
    F: Fn(ApiRequest, PathParams) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ApiResponse>> + Send,
{
    async fn handle(&self, request: ApiRequest, params: PathParams) -> anyhow::Result<ApiResponse> {
        (self.f)(request, params).await
    }
}

/// Wraps `f` as a shared [`ApiHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ApiHandler>
where
    F: Fn(ApiRequest, PathParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ApiResponse>> + Send + 'static,
{
    Arc::new(HandlerFn { f })
}
