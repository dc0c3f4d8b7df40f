//! HTTP middleware stack for the launcher.
//!
//! Builds the Tower middleware pipeline applied to every request reaching the
//! front door. Middleware ordering follows the outer-to-inner convention: the
//! first layer listed is the outermost (processes the request first on the
//! way in, and the response last on the way out).

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::HeaderName;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use super::config::LauncherConfig;
use super::cors::CorsPolicyLayer;
use super::shutdown::{LifecycleController, LifecycleState};

/// The composed Tower layer type produced by [`build_http_layers`].
type HttpLayers = tower::layer::util::Stack<
    TimeoutLayer,
    tower::layer::util::Stack<
        CorsPolicyLayer,
        tower::layer::util::Stack<
            PropagateRequestIdLayer,
            tower::layer::util::Stack<
                TraceLayer<
                    tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
                >,
                tower::layer::util::Stack<SetRequestIdLayer<MakeRequestUuid>, tower::layer::util::Identity>,
            >,
        >,
    >,
>;

/// Builds the transport-level middleware stack.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `SetRequestId` -- assigns a UUID v4 `X-Request-Id` to every incoming request
/// 2. `Tracing` -- logs request/response with structured trace spans
/// 3. `PropagateRequestId` -- copies `X-Request-Id` from the request to the response
/// 4. `CorsPolicy` -- cross-origin headers, scoped to the API prefix by the caller
/// 5. `Timeout` -- enforces a maximum request processing duration
///
/// The cross-origin layer sits outside the timeout and the drain check, so
/// 408 and 503 answers under the API prefix carry the policy headers too.
#[must_use]
pub fn build_http_layers(config: &LauncherConfig, cors: CorsPolicyLayer) -> HttpLayers {
    let x_request_id = HeaderName::from_static("x-request-id");

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .layer(cors)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .into_inner()
}

/// Counts the request as in flight for the drain, or refuses it once a stop
/// has been requested.
///
/// Requests that arrive on an already-open keep-alive connection after
/// `stop()` get 503. A request still running when the drain deadline forces
/// the remaining work closed is cancelled and answers 503.
pub async fn track_in_flight(
    State(lifecycle): State<Arc<LifecycleController>>,
    request: Request,
    next: Next,
) -> Response {
    if matches!(
        lifecycle.state(),
        LifecycleState::Draining | LifecycleState::Stopped
    ) {
        debug!(path = %request.uri().path(), "refusing request while draining");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let _guard = lifecycle.in_flight_guard();
    let path = request.uri().path().to_owned();
    tokio::select! {
        response = next.run(request) => response,
        () = lifecycle.force_closed() => {
            warn!(path = %path, "request cancelled at drain deadline");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}
