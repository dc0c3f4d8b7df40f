//! API dispatcher: routes requests under the API prefix to backend resource handlers.
//!
//! The routing table is collected once from the component catalog and is
//! immutable afterwards. Each request invokes at most one handler: the first
//! registered route whose template and method match.

use std::panic::AssertUnwindSafe;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::FutureExt;
use http_body_util::LengthLimitError;
use serde::Serialize;
use tracing::{debug, error, info_span, Instrument};
use winery_launcher_core::{Component, ComponentCatalog, PathParams, ResourceRoute};

use super::config::HandlerRegistration;
use super::prefix::PathPrefix;
use crate::error::ConfigurationError;

struct DispatchRoute {
    component: String,
    route: ResourceRoute,
}

/// Stateless router over the backend's resource handlers.
pub struct ApiDispatcher {
    prefix: PathPrefix,
    routes: Vec<DispatchRoute>,
    max_body_bytes: usize,
}

impl std::fmt::Debug for ApiDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiDispatcher")
            .field("prefix", &self.prefix)
            .field("routes", &self.routes.len())
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

impl ApiDispatcher {
    /// Collects every resource route registered under the requested namespaces.
    ///
    /// Namespaces are searched in the order given; a component reachable
    /// through more than one namespace is only registered once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidPathPrefix`] for a malformed prefix.
    pub fn from_catalog(
        catalog: &ComponentCatalog,
        registration: &HandlerRegistration,
        max_body_bytes: usize,
    ) -> Result<Self, ConfigurationError> {
        let prefix = PathPrefix::parse(&registration.path_prefix)?;
        let mut routes: Vec<DispatchRoute> = Vec::new();

        for namespace in &registration.namespaces {
            for entry in catalog.entries_in(namespace) {
                let Component::Resource(route) = &entry.component else {
                    continue;
                };
                let component = entry.qualified_name();
                if routes.iter().any(|r| r.component == component) {
                    continue;
                }
                debug!(
                    component = %component,
                    template = %route.template(),
                    "registered resource route"
                );
                routes.push(DispatchRoute {
                    component,
                    route: route.clone(),
                });
            }
        }

        Ok(Self {
            prefix,
            routes,
            max_body_bytes,
        })
    }

    /// Number of routes in the dispatch table.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Finds the first route declaring `method` that matches `path`.
    ///
    /// `HEAD` falls back to the first matching `GET` route when no route
    /// declares `HEAD` explicitly.
    fn find(&self, method: &Method, path: &str) -> Option<(&DispatchRoute, PathParams)> {
        let lookup = |wanted: &Method| {
            self.routes.iter().find_map(|r| {
                if r.route.declares(wanted) {
                    r.route.template().matches(path).map(|params| (r, params))
                } else {
                    None
                }
            })
        };

        lookup(method).or_else(|| {
            if method == Method::HEAD {
                lookup(&Method::GET)
            } else {
                None
            }
        })
    }

    /// Dispatches one request to exactly one handler, or answers 404.
    ///
    /// Handler errors and panics become 500 responses; nothing is retried.
    pub async fn dispatch(&self, req: Request) -> Response {
        let Some(relative) = self.prefix.strip(req.uri().path()) else {
            return error_response(StatusCode::NOT_FOUND, "not found");
        };
        let relative = relative.to_string();
        let method = req.method().clone();

        let Some((target, params)) = self.find(&method, &relative) else {
            debug!(%method, path = %relative, "no resource route matched");
            return error_response(StatusCode::NOT_FOUND, "no resource matches this request");
        };

        let span = info_span!(
            "dispatch",
            %method,
            path = %relative,
            component = %target.component,
            status = tracing::field::Empty,
        );
        let handler = target.route.handler();
        let max_body_bytes = self.max_body_bytes;

        async move {
            let declared_len = req
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok());
            if declared_len.is_some_and(|len| len > max_body_bytes) {
                return record(error_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "request body too large",
                ));
            }

            let (parts, body) = req.into_parts();
            let bytes = match axum::body::to_bytes(body, max_body_bytes).await {
                Ok(bytes) => bytes,
                Err(err) if exceeds_limit(&err) => {
                    return record(error_response(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        "request body too large",
                    ));
                }
                Err(err) => {
                    debug!(error = %err, "failed to read request body");
                    return record(error_response(StatusCode::BAD_REQUEST, "unreadable request body"));
                }
            };
            let request = http::Request::from_parts(parts, bytes);

            let outcome = AssertUnwindSafe(handler.handle(request, params))
                .catch_unwind()
                .await;

            let response = match outcome {
                Ok(Ok(response)) => response.map(Body::from),
                Ok(Err(err)) => {
                    error!(error = %format!("{err:#}"), "resource handler failed");
                    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
                }
                Err(panic) => {
                    error!(panic = panic_message(panic.as_ref()), "resource handler panicked");
                    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
                }
            };
            record(response)
        }
        .instrument(span)
        .await
    }
}

/// Whether a body read failed because the stream ran past the size limit.
fn exceeds_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        if current.is::<LengthLimitError>() {
            return true;
        }
        source = current.source();
    }
    false
}

fn record(response: Response) -> Response {
    tracing::Span::current().record("status", response.status().as_u16());
    response
}

/// JSON body of every response the dispatcher generates itself.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorBody { error: message })).into_response()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
