//! Winery launcher core: contracts between the launcher and the backend it exposes.

pub mod catalog;
pub mod route;
pub mod session;
pub mod traits;

pub use catalog::{
    namespace_contains, CatalogEntry, CatalogError, Component, ComponentCatalog, EndpointFactory,
    ResourceRoute, NAMESPACE_SEPARATOR,
};
pub use route::{PathParams, RouteTemplate, RouteTemplateError};
pub use session::{ChannelMessage, Session, SessionClosed};
pub use traits::{handler_fn, ApiHandler, ApiRequest, ApiResponse, Backend, HandlerFn, RealtimeEndpoint};
