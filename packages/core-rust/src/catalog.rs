//! The set of backend components the launcher can discover.
//!
//! A backend fills a [`ComponentCatalog`] once during composition. The
//! dispatcher and endpoint discovery then query it by namespace, so no
//! component list is hard-coded in the launcher itself.

use std::fmt;
use std::sync::Arc;

use http::Method;

use crate::route::{RouteTemplate, RouteTemplateError};
use crate::traits::{ApiHandler, RealtimeEndpoint};

/// Separator between namespace segments (`winery::rest::websockets`).
pub const NAMESPACE_SEPARATOR: &str = "::";

/// Fallible constructor for a realtime endpoint.
pub type EndpointFactory = Arc<dyn Fn() -> anyhow::Result<Arc<dyn RealtimeEndpoint>> + Send + Sync>;

/// A resource handler together with the route it answers.
#[derive(Clone)]
pub struct ResourceRoute {
    methods: Vec<Method>,
    template: RouteTemplate,
    handler: Arc<dyn ApiHandler>,
}

impl ResourceRoute {
    /// # Errors
    ///
    /// Returns an error if `template` is not a valid route template.
    pub fn new(
        methods: impl IntoIterator<Item = Method>,
        template: &str,
        handler: Arc<dyn ApiHandler>,
    ) -> Result<Self, RouteTemplateError> {
        Ok(Self {
            methods: methods.into_iter().collect(),
            template: RouteTemplate::parse(template)?,
            handler,
        })
    }

    #[must_use]
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    #[must_use]
    pub fn template(&self) -> &RouteTemplate {
        &self.template
    }

    #[must_use]
    pub fn handler(&self) -> Arc<dyn ApiHandler> {
        Arc::clone(&self.handler)
    }

    /// Whether this route explicitly declares `method`.
    #[must_use]
    pub fn declares(&self, method: &Method) -> bool {
        self.methods.iter().any(|m| m == method)
    }
}

impl fmt::Debug for ResourceRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRoute")
            .field("methods", &self.methods)
            .field("template", &self.template.as_str())
            .finish_non_exhaustive()
    }
}

/// What a catalog entry provides.
#[derive(Clone)]
pub enum Component {
    /// A REST resource handler, picked up by the API dispatcher.
    Resource(ResourceRoute),
    /// A realtime endpoint, picked up by endpoint discovery.
    Endpoint(EndpointFactory),
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(route) => f.debug_tuple("Resource").field(route).finish(),
            Self::Endpoint(_) => f.write_str("Endpoint(..)"),
        }
    }
}

/// A named component registered under a namespace.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub namespace: String,
    pub name: String,
    pub component: Component,
}

impl CatalogEntry {
    /// `namespace::name`, used as the implementation identity in logs and descriptors.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}{NAMESPACE_SEPARATOR}{}", self.namespace, self.name)
    }
}

/// Errors raised while registering components.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("invalid namespace: {0:?}")]
    InvalidNamespace(String),
    #[error("invalid component name: {0:?}")]
    InvalidName(String),
    #[error("component `{name}` is already registered in namespace `{namespace}`")]
    DuplicateComponent { namespace: String, name: String },
    #[error(transparent)]
    Route(#[from] RouteTemplateError),
}

/// Ordered registry of backend components.
#[derive(Debug, Clone, Default)]
pub struct ComponentCatalog {
    entries: Vec<CatalogEntry>,
}

impl ComponentCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component. Registration order is preserved for queries.
    ///
    /// # Errors
    ///
    /// Returns an error when the namespace or name is malformed, or when the
    /// name is already taken within the namespace.
    pub fn register(
        &mut self,
        namespace: &str,
        name: &str,
        component: Component,
    ) -> Result<(), CatalogError> {
        if !is_valid_namespace(namespace) {
            return Err(CatalogError::InvalidNamespace(namespace.to_string()));
        }
        if !is_valid_identifier(name) {
            return Err(CatalogError::InvalidName(name.to_string()));
        }
        if self
            .entries
            .iter()
            .any(|e| e.namespace == namespace && e.name == name)
        {
            return Err(CatalogError::DuplicateComponent {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }

        self.entries.push(CatalogEntry {
            namespace: namespace.to_string(),
            name: name.to_string(),
            component,
        });
        Ok(())
    }

    /// Registers a resource handler for `methods` on `template`.
    ///
    /// # Errors
    ///
    /// See [`ComponentCatalog::register`]; also fails on a bad route template.
    pub fn register_resource(
        &mut self,
        namespace: &str,
        name: &str,
        methods: impl IntoIterator<Item = Method>,
        template: &str,
        handler: Arc<dyn ApiHandler>,
    ) -> Result<(), CatalogError> {
        let route = ResourceRoute::new(methods, template, handler)?;
        self.register(namespace, name, Component::Resource(route))
    }

    /// Registers a realtime endpoint constructor.
    ///
    /// # Errors
    ///
    /// See [`ComponentCatalog::register`].
    pub fn register_endpoint<F>(&mut self, namespace: &str, name: &str, factory: F) -> Result<(), CatalogError>
    where
        F: Fn() -> anyhow::Result<Arc<dyn RealtimeEndpoint>> + Send + Sync + 'static,
    {
        self.register(namespace, name, Component::Endpoint(Arc::new(factory)))
    }

    /// Iterates over entries whose namespace is `namespace` or nested below it.
    pub fn entries_in<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a CatalogEntry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| namespace_contains(namespace, &entry.namespace))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether `child` equals `parent` or is nested below it.
#[must_use]
pub fn namespace_contains(parent: &str, child: &str) -> bool {
    match child.strip_prefix(parent) {
        Some("") => true,
        Some(rest) => rest.starts_with(NAMESPACE_SEPARATOR),
        None => false,
    }
}

fn is_valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty() && namespace.split(NAMESPACE_SEPARATOR).all(is_valid_identifier)
}

fn is_valid_identifier(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
