//! Launcher configuration types.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for the launcher's HTTP front door.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Static frontend bundles, one mount each.
    pub mounts: Vec<MountConfig>,
    /// API prefix and the namespaces searched for resource handlers.
    pub api: HandlerRegistration,
    /// Namespace scanned for realtime endpoints.
    pub endpoint_namespace: String,
    /// Cross-origin policy applied under the API prefix.
    pub cors: CorsConfig,
    /// Out-of-band shutdown control.
    pub shutdown: ShutdownConfig,
    /// Upper bound on waiting for in-flight requests after `stop()`.
    pub drain_timeout: Duration,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
    /// Largest request body the API dispatcher buffers.
    pub max_body_bytes: usize,
    /// Per-session settings for realtime endpoints.
    pub connection: ConnectionConfig,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            mounts: MountConfig::defaults_under(&PathBuf::from("frontend")),
            api: HandlerRegistration::default(),
            endpoint_namespace: "winery::rest::websockets".to_string(),
            cors: CorsConfig::default(),
            shutdown: ShutdownConfig::default(),
            drain_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 64 * 1024 * 1024,
            connection: ConnectionConfig::default(),
        }
    }
}

/// A static mount: URL prefix served from a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    pub path_prefix: String,
    pub root: PathBuf,
    pub allow_directory_listing: bool,
}

impl MountConfig {
    #[must_use]
    pub fn new(path_prefix: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            root: root.into(),
            allow_directory_listing: true,
        }
    }

    /// The two Winery frontend bundles laid out under `bundle_dir`.
    #[must_use]
    pub fn defaults_under(bundle_dir: &std::path::Path) -> Vec<Self> {
        vec![
            Self::new("/winery-topologymodeler", bundle_dir.join("topologymodeler")),
            Self::new("/", bundle_dir.join("tosca-management")),
        ]
    }
}

/// Which namespaces the API dispatcher searches, and under which prefix it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerRegistration {
    pub path_prefix: String,
    pub namespaces: Vec<String>,
}

impl Default for HandlerRegistration {
    fn default() -> Self {
        Self {
            path_prefix: "/winery".to_string(),
            namespaces: vec![
                "winery::rest::resources".to_string(),
                "winery::rest::filters".to_string(),
            ],
        }
    }
}

/// Cross-origin policy values. `"*"` in `allowed_origins` allows any origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "PUT", "POST", "DELETE", "HEAD", "OPTIONS"]
                .map(String::from)
                .to_vec(),
            allowed_headers: ["X-Requested-With", "Content-Type", "Accept", "Origin"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// Administrative shutdown endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownConfig {
    /// Path of the control endpoint.
    pub path: String,
    /// Shared secret compared against the `token` query parameter.
    pub token: Option<String>,
    /// Additionally require the request to come from a loopback address.
    pub local_only: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            path: "/shutdown".to_string(),
            token: Some("winery".to_string()),
            local_only: false,
        }
    }
}

/// Per-session configuration controlling backpressure.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bounded mpsc channel capacity for outbound messages per session.
    pub outbound_channel_capacity: usize,
    /// Bounded mpsc channel capacity for inbound messages per session.
    pub inbound_channel_capacity: usize,
    /// Maximum time to wait when sending a message to a session.
    pub send_timeout: Duration,
    /// WebSocket write buffer size in bytes.
    pub ws_write_buffer_size: usize,
    /// Maximum WebSocket write buffer size in bytes.
    pub ws_max_write_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_channel_capacity: 256,
            inbound_channel_capacity: 256,
            send_timeout: Duration::from_secs(5),
            ws_write_buffer_size: 131_072,     // 128 KB
            ws_max_write_buffer_size: 524_288, // 512 KB
        }
    }
}
