//! Networking: the front door, its routing tables, sessions and lifecycle.

pub mod config;
pub mod connection;
pub mod cors;
pub mod discovery;
pub mod dispatcher;
pub mod handlers;
pub mod middleware;
pub mod mounts;
pub mod prefix;
pub mod server;
pub mod shutdown;

pub use config::*;
pub use connection::{ConnectionHandle, ConnectionId, ConnectionRegistry, SendError};
pub use cors::{CorsPolicy, CorsPolicyLayer};
pub use discovery::{
    discover, register_endpoints, DiscoveredEndpoint, DiscoveryReport, DiscoveryWarning, EndpointDescriptor,
    EndpointTable,
};
pub use dispatcher::ApiDispatcher;
pub use mounts::{Mount, MountTable};
pub use prefix::PathPrefix;
pub use server::{ServerHandle, ServerInstance};
pub use shutdown::{InFlightGuard, LifecycleController, LifecycleState};
