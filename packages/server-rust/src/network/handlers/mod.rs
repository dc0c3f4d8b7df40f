//! HTTP and websocket handlers behind the front door.
//!
//! `front_door` is the router's only handler; it hands each request to
//! shutdown control, the API entry or the static mounts.

pub mod api;
pub mod front_door;
pub mod shutdown;
pub mod websocket;

pub use api::{api_router, ApiState};
pub use front_door::{front_door, AppState};
pub use shutdown::ShutdownControl;
pub use websocket::SessionContext;
