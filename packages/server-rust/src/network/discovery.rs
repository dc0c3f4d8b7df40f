//! Realtime endpoint discovery and the endpoint table.
//!
//! Discovery instantiates every endpoint factory registered under the
//! endpoint namespace and reads each instance's declared path. Faulty
//! candidates are reported and skipped; they never abort startup.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};
use winery_launcher_core::{Component, ComponentCatalog, RealtimeEndpoint};

use super::prefix::PathPrefix;
use crate::error::ConfigurationError;

/// Identity of one discovered endpoint implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointDescriptor {
    /// Qualified component name, e.g. `winery::rest::websockets::git`.
    pub implementation: String,
    /// Declared path relative to the API prefix, e.g. `/git`.
    pub path: String,
}

/// A descriptor paired with the live instance it was read from.
#[derive(Clone)]
pub struct DiscoveredEndpoint {
    pub descriptor: EndpointDescriptor,
    pub endpoint: Arc<dyn RealtimeEndpoint>,
}

impl std::fmt::Debug for DiscoveredEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveredEndpoint")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// A candidate that could not be turned into an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryWarning {
    pub candidate: String,
    pub reason: String,
}

/// Outcome of one discovery run.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub endpoints: Vec<DiscoveredEndpoint>,
    pub warnings: Vec<DiscoveryWarning>,
}

impl DiscoveryReport {
    /// Descriptors in discovery order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<EndpointDescriptor> {
        self.endpoints.iter().map(|e| e.descriptor.clone()).collect()
    }
}

/// Instantiates every endpoint factory under `namespace` (and its children).
///
/// The result depends only on the catalog contents: running it twice yields
/// equal descriptor lists in the same order.
#[must_use]
pub fn discover(catalog: &ComponentCatalog, namespace: &str) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();

    for entry in catalog.entries_in(namespace) {
        let Component::Endpoint(factory) = &entry.component else {
            continue;
        };
        let candidate = entry.qualified_name();

        let endpoint = match factory() {
            Ok(endpoint) => endpoint,
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(candidate = %candidate, reason = %reason, "skipping endpoint that failed to load");
                report.warnings.push(DiscoveryWarning { candidate, reason });
                continue;
            }
        };

        let path = endpoint.path().to_string();
        if let Err(reason) = validate_endpoint_path(&path) {
            warn!(candidate = %candidate, path = %path, reason, "skipping endpoint with invalid path");
            report.warnings.push(DiscoveryWarning {
                candidate,
                reason: reason.to_string(),
            });
            continue;
        }

        let descriptor = EndpointDescriptor {
            implementation: candidate,
            path,
        };
        if report.endpoints.iter().any(|e| e.descriptor == descriptor) {
            continue;
        }
        debug!(implementation = %descriptor.implementation, path = %descriptor.path, "discovered endpoint");
        report.endpoints.push(DiscoveredEndpoint { descriptor, endpoint });
    }

    report
}

fn validate_endpoint_path(path: &str) -> Result<(), &'static str> {
    if !path.starts_with('/') {
        return Err("path must start with `/`");
    }
    if path.chars().any(|c| c.is_whitespace() || c == '{' || c == '}') {
        return Err("path must not contain whitespace or template braces");
    }
    Ok(())
}

struct BoundEndpoint {
    implementation: String,
    endpoint: Arc<dyn RealtimeEndpoint>,
}

/// Full request path -> endpoint implementation. Immutable once serving starts.
#[derive(Default)]
pub struct EndpointTable {
    by_path: HashMap<String, BoundEndpoint>,
}

impl std::fmt::Debug for EndpointTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut paths: Vec<&String> = self.by_path.keys().collect();
        paths.sort();
        f.debug_struct("EndpointTable").field("paths", &paths).finish()
    }
}

impl EndpointTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the endpoint bound to a full request path.
    #[must_use]
    pub fn get(&self, full_path: &str) -> Option<Arc<dyn RealtimeEndpoint>> {
        self.by_path.get(full_path).map(|b| Arc::clone(&b.endpoint))
    }

    /// Implementation name bound to a full request path.
    #[must_use]
    pub fn implementation(&self, full_path: &str) -> Option<&str> {
        self.by_path.get(full_path).map(|b| b.implementation.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

/// Binds each discovered endpoint under `api_prefix`.
///
/// # Errors
///
/// Returns [`ConfigurationError::DuplicateEndpointPath`] naming both
/// implementations when two endpoints claim the same full path. The table is
/// left unchanged in that case.
pub fn register_endpoints(
    table: &mut EndpointTable,
    api_prefix: &PathPrefix,
    endpoints: &[DiscoveredEndpoint],
) -> Result<(), ConfigurationError> {
    let mut staged: HashMap<String, BoundEndpoint> = HashMap::with_capacity(endpoints.len());

    for discovered in endpoints {
        let full_path = api_prefix.join(&discovered.descriptor.path);
        let existing = table.by_path.get(&full_path).or_else(|| staged.get(&full_path));
        if let Some(existing) = existing {
            return Err(ConfigurationError::DuplicateEndpointPath {
                path: full_path,
                first: existing.implementation.clone(),
                second: discovered.descriptor.implementation.clone(),
            });
        }
        staged.insert(
            full_path,
            BoundEndpoint {
                implementation: discovered.descriptor.implementation.clone(),
                endpoint: Arc::clone(&discovered.endpoint),
            },
        );
    }

    table.by_path.extend(staged);
    Ok(())
}
