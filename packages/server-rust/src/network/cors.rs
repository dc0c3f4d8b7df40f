//! Cross-origin policy filter applied to everything under the API prefix.
//!
//! Every response gets the allow-origin, allow-methods and allow-headers
//! headers. `OPTIONS` requests never reach the inner service: they are
//! answered directly with the policy headers and an empty body.
//!
//! A layer scoped to a prefix passes requests outside that prefix through
//! untouched, so it can sit in the outer stack and still cover responses
//! generated there (timeouts, drain refusals).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{self, HeaderName};
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::Response;
use tower::{Layer, Service};

use super::config::CorsConfig;
use super::prefix::PathPrefix;
use crate::error::ConfigurationError;

#[derive(Debug, Clone)]
enum AllowedOrigin {
    Any,
    List(Vec<HeaderValue>),
}

/// Validated cross-origin policy.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    origin: AllowedOrigin,
    methods: HeaderValue,
    headers: HeaderValue,
}

impl CorsPolicy {
    /// Validates the configured values into header values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidCorsValue`] for any origin, method
    /// or header name that cannot be sent as an HTTP header.
    pub fn from_config(config: &CorsConfig) -> Result<Self, ConfigurationError> {
        let origin = if config.allowed_origins.iter().any(|o| o == "*") {
            AllowedOrigin::Any
        } else {
            let parsed = config
                .allowed_origins
                .iter()
                .map(|o| {
                    HeaderValue::from_str(o).map_err(|_| ConfigurationError::InvalidCorsValue {
                        field: "origin",
                        value: o.clone(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            AllowedOrigin::List(parsed)
        };

        for method in &config.allowed_methods {
            Method::from_bytes(method.as_bytes()).map_err(|_| ConfigurationError::InvalidCorsValue {
                field: "method",
                value: method.clone(),
            })?;
        }
        for name in &config.allowed_headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| ConfigurationError::InvalidCorsValue {
                field: "header",
                value: name.clone(),
            })?;
        }

        let methods = join_header(&config.allowed_methods, "method")?;
        let headers = join_header(&config.allowed_headers, "header")?;

        Ok(Self {
            origin,
            methods,
            headers,
        })
    }

    /// Writes the policy headers for a request carrying `request_origin`.
    fn apply(&self, request_origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        match &self.origin {
            AllowedOrigin::Any => {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
            }
            AllowedOrigin::List(allowed) => {
                headers.append(header::VARY, HeaderValue::from_static("Origin"));
                if let Some(origin) = request_origin.filter(|o| allowed.contains(o)) {
                    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
                }
            }
        }
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, self.methods.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, self.headers.clone());
    }
}

fn join_header(values: &[String], field: &'static str) -> Result<HeaderValue, ConfigurationError> {
    let joined = values.join(",");
    HeaderValue::from_str(&joined).map_err(|_| ConfigurationError::InvalidCorsValue {
        field,
        value: joined,
    })
}

/// Tower layer installing a [`CorsPolicy`].
#[derive(Debug, Clone)]
pub struct CorsPolicyLayer {
    policy: Arc<CorsPolicy>,
    scope: Option<PathPrefix>,
}

impl CorsPolicyLayer {
    /// Applies the policy to every request.
    #[must_use]
    pub fn new(policy: CorsPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            scope: None,
        }
    }

    /// Applies the policy only to requests under `prefix`.
    #[must_use]
    pub fn scoped_to(policy: CorsPolicy, prefix: PathPrefix) -> Self {
        Self {
            policy: Arc::new(policy),
            scope: Some(prefix),
        }
    }
}

impl<S> Layer<S> for CorsPolicyLayer {
    type Service = CorsPolicyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorsPolicyService {
            inner,
            policy: Arc::clone(&self.policy),
            scope: self.scope.clone(),
        }
    }
}

/// Service wrapper that applies the policy and answers `OPTIONS` itself.
#[derive(Debug, Clone)]
pub struct CorsPolicyService<S> {
    inner: S,
    policy: Arc<CorsPolicy>,
    scope: Option<PathPrefix>,
}

impl<S, B> Service<Request<B>> for CorsPolicyService<S>
where
    S: Service<Request<B>, Response = Response> + Send,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let in_scope = match &self.scope {
            Some(prefix) => prefix.strip(req.uri().path()).is_some(),
            None => true,
        };
        if !in_scope {
            return Box::pin(self.inner.call(req));
        }

        let policy = Arc::clone(&self.policy);
        let origin = req.headers().get(header::ORIGIN).cloned();

        if req.method() == Method::OPTIONS {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::OK;
            policy.apply(origin.as_ref(), response.headers_mut());
            return Box::pin(async move { Ok(response) });
        }

        let fut = self.inner.call(req);
        Box::pin(async move {
            let mut response = fut.await?;
            policy.apply(origin.as_ref(), response.headers_mut());
            Ok(response)
        })
    }
}
