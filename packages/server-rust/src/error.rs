//! Startup and lifecycle errors for the launcher.

use std::path::PathBuf;

/// Fatal composition-time misconfiguration. Aborts startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("static mount `{prefix}`: root {root:?} does not exist or is not accessible")]
    MissingMountRoot {
        prefix: String,
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("static mount `{prefix}`: root {root:?} is not a directory")]
    MountRootNotDirectory { prefix: String, root: PathBuf },
    #[error("static mount prefix `{0}` is registered twice")]
    DuplicateMountPrefix(String),
    #[error("invalid path prefix {0:?}: must be `/` or start with `/` and not end with `/`")]
    InvalidPathPrefix(String),
    #[error("endpoint path `{path}` is claimed by both `{first}` and `{second}`")]
    DuplicateEndpointPath {
        path: String,
        first: String,
        second: String,
    },
    #[error("shutdown token must be configured and non-empty")]
    MissingShutdownToken,
    #[error("invalid CORS {field} value {value:?}")]
    InvalidCorsValue { field: &'static str, value: String },
}

/// Errors returned by the composition root and its lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum LauncherError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("failed to bind {addr} (port {port}): {source}")]
    Bind {
        addr: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("backend failed to initialize: {0:#}")]
    Backend(#[source] anyhow::Error),
    #[error("backend has not been initialized")]
    BackendNotInitialized,
    #[error("server has already been started")]
    AlreadyStarted,
    #[error("server has not been started")]
    NotStarted,
    #[error("server terminated with an I/O error: {0}")]
    Serve(#[from] std::io::Error),
}

impl LauncherError {
    /// Process exit code for this error when it aborts the launcher.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Configuration(_) => 2,
            Self::Bind { .. } => 3,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_distinguish_startup_failures() {
        let config = LauncherError::from(ConfigurationError::MissingShutdownToken);
        assert_eq!(config.exit_code(), 2);

        let bind = LauncherError::Bind {
            addr: "0.0.0.0:8080".to_string(),
            port: 8080,
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert_eq!(bind.exit_code(), 3);
        assert!(bind.to_string().contains("8080"));

        assert_eq!(LauncherError::BackendNotInitialized.exit_code(), 1);
    }

    #[test]
    fn duplicate_endpoint_message_names_both_implementations() {
        let err = ConfigurationError::DuplicateEndpointPath {
            path: "/winery/git".to_string(),
            first: "winery::rest::websockets::git".to_string(),
            second: "winery::rest::websockets::git_v2".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("/winery/git"));
        assert!(message.contains("git_v2"));
    }
}
