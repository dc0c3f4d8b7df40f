//! Server composition root with deferred startup lifecycle.
//!
//! `build()` validates configuration, initializes the backend and assembles
//! the request chain without binding any port; `start()` binds the listener
//! and begins accepting; `join()` waits for a stop request and drains.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures_util::future::join_all;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use winery_launcher_core::{Backend, ChannelMessage, ComponentCatalog};

use super::config::LauncherConfig;
use super::connection::{ConnectionRegistry, SendError};
use super::cors::{CorsPolicy, CorsPolicyLayer};
use super::discovery::{discover, register_endpoints, DiscoveryWarning, EndpointDescriptor, EndpointTable};
use super::dispatcher::ApiDispatcher;
use super::handlers::{api_router, front_door, ApiState, AppState, SessionContext, ShutdownControl};
use super::middleware::{build_http_layers, track_in_flight};
use super::mounts::MountTable;
use super::prefix::PathPrefix;
use super::shutdown::{LifecycleController, LifecycleState};
use crate::error::LauncherError;

/// How long cancelled work gets to unwind after the drain deadline.
const FORCE_CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Cloneable handle for stopping a running server from another task.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    lifecycle: Arc<LifecycleController>,
}

impl ServerHandle {
    /// Requests a graceful stop. Idempotent.
    pub fn stop(&self) {
        self.lifecycle.trigger_shutdown();
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }
}

/// A fully composed launcher server.
///
/// Follows the deferred startup pattern:
/// 1. `build()` -- validates, initializes the backend, composes the router
/// 2. `start()` -- binds the TCP listener and spawns the accept loop
/// 3. `join()` -- waits for stop, drains, closes the backend
pub struct ServerInstance {
    config: LauncherConfig,
    backend: Arc<dyn Backend>,
    lifecycle: Arc<LifecycleController>,
    registry: Arc<ConnectionRegistry>,
    router: Router,
    endpoints: Vec<EndpointDescriptor>,
    warnings: Vec<DiscoveryWarning>,
    local_addr: Option<SocketAddr>,
    serve_task: Option<JoinHandle<std::io::Result<()>>>,
}

impl ServerInstance {
    /// Composes the server. Nothing is bound until [`ServerInstance::start`].
    ///
    /// # Errors
    ///
    /// - [`LauncherError::Configuration`] for an invalid shutdown token,
    ///   prefix, CORS value, mount root or a duplicate endpoint path
    /// - [`LauncherError::Backend`] when the backend fails to initialize or
    ///   to register its components
    /// - [`LauncherError::BackendNotInitialized`] when the backend does not
    ///   report itself initialized after `initialize()`
    pub async fn build(config: LauncherConfig, backend: Arc<dyn Backend>) -> Result<Self, LauncherError> {
        let lifecycle = Arc::new(LifecycleController::new());

        let shutdown = ShutdownControl::from_config(&config.shutdown, Arc::clone(&lifecycle))?;
        let api_prefix = PathPrefix::parse(&config.api.path_prefix)?;
        let cors = CorsPolicy::from_config(&config.cors)?;

        let mounts = MountTable::from_config(&config.mounts)?;

        backend.initialize().await.map_err(LauncherError::Backend)?;
        if !backend.is_initialized() {
            return Err(LauncherError::BackendNotInitialized);
        }
        info!(backend = backend.name(), "backend initialized");

        let assembled = assemble(&config, backend.as_ref(), api_prefix, cors, shutdown, mounts, &lifecycle);
        let assembled = match assembled {
            Ok(assembled) => assembled,
            Err(err) => {
                if let Err(close_err) = backend.close().await {
                    warn!(error = %format!("{close_err:#}"), "backend failed to close after aborted startup");
                }
                return Err(err);
            }
        };

        match backend.repository_root() {
            Some(root) => debug!(root = %root.display(), "using repository"),
            None => debug!(backend = backend.name(), "backend is not file based"),
        }

        Ok(Self {
            config,
            backend,
            lifecycle,
            registry: assembled.registry,
            router: assembled.router,
            endpoints: assembled.endpoints,
            warnings: assembled.warnings,
            local_addr: None,
            serve_task: None,
        })
    }

    /// Binds the TCP listener and spawns the accept loop.
    ///
    /// Returns the actual bound address, which differs from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::Bind`] naming the address and port when the
    /// listener cannot be bound, and [`LauncherError::AlreadyStarted`] when
    /// the server has already been started or stopped.
    pub async fn start(&mut self) -> Result<SocketAddr, LauncherError> {
        if self.serve_task.is_some() || self.lifecycle.state() != LifecycleState::Created {
            return Err(LauncherError::AlreadyStarted);
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let bind_error = |source| LauncherError::Bind {
            addr: addr.clone(),
            port: self.config.port,
            source,
        };
        let listener = TcpListener::bind(&addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let stop_requested = self.lifecycle.stop_requested();
        let app = self
            .router
            .clone()
            .into_make_service_with_connect_info::<SocketAddr>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(stop_requested)
                .await
        });

        self.lifecycle.set_started();
        self.local_addr = Some(local_addr);
        self.serve_task = Some(task);
        info!(addr = %local_addr, "launcher listening");
        Ok(local_addr)
    }

    /// Requests a graceful stop. The drain itself happens in [`ServerInstance::join`].
    pub fn stop(&self) {
        self.lifecycle.trigger_shutdown();
    }

    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// The bound address, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Descriptors of the endpoints bound during composition.
    #[must_use]
    pub fn endpoints(&self) -> &[EndpointDescriptor] {
        &self.endpoints
    }

    #[must_use]
    pub fn discovery_warnings(&self) -> &[DiscoveryWarning] {
        &self.warnings
    }

    /// The composed request chain, for driving requests without a listener.
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Returns the backend composition produced.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::BackendNotInitialized`] if the backend no
    /// longer reports itself initialized.
    pub fn initialized_backend(&self) -> Result<Arc<dyn Backend>, LauncherError> {
        if self.backend.is_initialized() {
            Ok(Arc::clone(&self.backend))
        } else {
            Err(LauncherError::BackendNotInitialized)
        }
    }

    /// Blocks until a stop is requested, then drains and releases everything.
    ///
    /// After the stop request:
    /// 1. The listener is closed, so new connections are refused
    /// 2. All sessions receive a Close frame
    /// 3. Waits up to `drain_timeout` for in-flight requests and sessions
    /// 4. Cancels whatever is still running once the deadline has passed
    /// 5. State transitions to Stopped and the backend is closed
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::NotStarted`] if `start()` was never called,
    /// and [`LauncherError::Serve`] if the accept loop failed.
    pub async fn join(mut self) -> Result<(), LauncherError> {
        let Some(mut task) = self.serve_task.take() else {
            return Err(LauncherError::NotStarted);
        };

        let finished_early = tokio::select! {
            () = self.lifecycle.stop_requested() => None,
            result = &mut task => Some(result),
        };
        if finished_early.is_some() {
            self.lifecycle.trigger_shutdown();
        }

        let deadline = Instant::now() + self.config.drain_timeout;
        info!(state = self.lifecycle.state().as_str(), "stop requested, draining");

        let sessions = self.registry.drain_all();
        if !sessions.is_empty() {
            info!(sessions = sessions.len(), "closing open sessions");
            let send_timeout = self.config.connection.send_timeout.min(self.config.drain_timeout);
            let closes = sessions.iter().map(|session| async move {
                let close = ChannelMessage::Close(Some("server shutting down".to_string()));
                (session, session.send_timeout(close, send_timeout).await)
            });
            for (session, result) in join_all(closes).await {
                if result == Err(SendError::Timeout) {
                    warn!(
                        session = session.id.0,
                        path = %session.endpoint_path,
                        peer = ?session.remote_addr,
                        "session did not accept a close frame in time"
                    );
                }
            }
        }

        let served = match finished_early {
            Some(result) => Some(result),
            None => tokio::time::timeout_at(deadline, &mut task).await.ok(),
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if self.lifecycle.wait_for_drain(remaining).await {
            info!("all in-flight requests drained");
        } else {
            warn!(
                in_flight = self.lifecycle.in_flight_count(),
                "drain timeout expired, cancelling remaining requests and sessions"
            );
            self.lifecycle.force_close();
            if !self.lifecycle.wait_for_drain(FORCE_CLOSE_GRACE).await {
                warn!(
                    in_flight = self.lifecycle.in_flight_count(),
                    "work still running after force close"
                );
            }
        }

        let served = match served {
            Some(result) => Some(result),
            None => match tokio::time::timeout(FORCE_CLOSE_GRACE, &mut task).await {
                Ok(result) => Some(result),
                Err(_) => {
                    warn!("connections still open after force close, aborting accept loop");
                    task.abort();
                    None
                }
            },
        };
        self.lifecycle.mark_stopped();

        if let Err(err) = self.backend.close().await {
            error!(error = %format!("{err:#}"), "backend failed to close");
        }
        info!("launcher stopped");

        match served {
            Some(Ok(Err(err))) => Err(LauncherError::Serve(err)),
            Some(Err(join_err)) if join_err.is_panic() => Err(LauncherError::Serve(std::io::Error::other(
                format!("accept loop panicked: {join_err}"),
            ))),
            _ => Ok(()),
        }
    }
}

/// The parts of the request chain assembled after backend initialization.
struct Assembled {
    router: Router,
    registry: Arc<ConnectionRegistry>,
    endpoints: Vec<EndpointDescriptor>,
    warnings: Vec<DiscoveryWarning>,
}

/// Collects the catalog, builds the dispatcher, runs discovery and composes
/// the router, in that order.
fn assemble(
    config: &LauncherConfig,
    backend: &dyn Backend,
    api_prefix: PathPrefix,
    cors: CorsPolicy,
    shutdown: ShutdownControl,
    mounts: MountTable,
    lifecycle: &Arc<LifecycleController>,
) -> Result<Assembled, LauncherError> {
    let mut catalog = ComponentCatalog::new();
    backend
        .register_components(&mut catalog)
        .map_err(LauncherError::Backend)?;

    let dispatcher = ApiDispatcher::from_catalog(&catalog, &config.api, config.max_body_bytes)?;

    let report = discover(&catalog, &config.endpoint_namespace);

    let mut endpoints = EndpointTable::new();
    register_endpoints(&mut endpoints, &api_prefix, &report.endpoints)?;

    info!(
        mounts = mounts.len(),
        routes = dispatcher.route_count(),
        endpoints = endpoints.len(),
        warnings = report.warnings.len(),
        "composed request chain"
    );

    let registry = Arc::new(ConnectionRegistry::new());
    let api = api_router(
        ApiState {
            dispatcher: Arc::new(dispatcher),
            endpoints: Arc::new(endpoints),
            sessions: SessionContext {
                registry: Arc::clone(&registry),
                config: Arc::new(config.connection.clone()),
                lifecycle: Arc::clone(lifecycle),
            },
        },
    );
    let cors = CorsPolicyLayer::scoped_to(cors, api_prefix.clone());
    let state = AppState {
        shutdown: Arc::new(shutdown),
        api_prefix,
        api,
        mounts: Arc::new(mounts),
    };

    let router = Router::new()
        .fallback(front_door)
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(lifecycle),
            track_in_flight,
        ))
        .layer(build_http_layers(config, cors))
        .with_state(state);

    Ok(Assembled {
        router,
        registry,
        endpoints: report.descriptors(),
        warnings: report.warnings,
    })
}
