//! `winery-launcher` binary: serves the Winery frontends and API until told to stop.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use winery_launcher::network::{MountConfig, ServerHandle};
use winery_launcher::{LauncherConfig, LauncherError, ServerInstance, StandaloneBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "winery-launcher")]
#[command(version)]
#[command(about = "Serves the Winery frontends and REST API from one embedded HTTP server")]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "WINERY_LAUNCHER_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, short, env = "WINERY_LAUNCHER_PORT", default_value_t = 8080)]
    port: u16,

    /// Directory holding the `topologymodeler` and `tosca-management` bundles.
    #[arg(long, env = "WINERY_FRONTEND_DIR", default_value = "frontend")]
    frontend_dir: PathBuf,

    /// Repository directory; created on startup if missing.
    #[arg(long, env = "WINERY_REPOSITORY_ROOT", default_value = "repository")]
    repository_root: PathBuf,

    /// Secret expected by `POST /shutdown?token=...`.
    #[arg(long, env = "WINERY_SHUTDOWN_TOKEN", default_value = "winery", hide_env_values = true)]
    shutdown_token: String,

    /// Only accept shutdown requests from loopback peers.
    #[arg(long, env = "WINERY_SHUTDOWN_LOCAL_ONLY")]
    shutdown_local_only: bool,

    /// Seconds to wait for in-flight requests after a stop request.
    #[arg(long, env = "WINERY_DRAIN_TIMEOUT_SECS", default_value_t = 5)]
    drain_timeout_secs: u64,

    #[arg(long, env = "WINERY_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

impl Cli {
    fn into_config(self) -> (LauncherConfig, PathBuf) {
        let mut config = LauncherConfig {
            host: self.host,
            port: self.port,
            mounts: MountConfig::defaults_under(&self.frontend_dir),
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            ..LauncherConfig::default()
        };
        config.shutdown.token = Some(self.shutdown_token);
        config.shutdown.local_only = self.shutdown_local_only;
        (config, self.repository_root)
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("winery_launcher=info,tower_http=info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

/// Stops the server on SIGINT, and on SIGTERM where available.
fn stop_on_signal(handle: ServerHandle) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut terminate) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = terminate.recv() => {}
                    }
                }
                Err(err) => {
                    error!(error = %err, "cannot install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("signal received");
        handle.stop();
    });
}

async fn run(cli: Cli) -> Result<(), LauncherError> {
    let (config, repository_root) = cli.into_config();
    let backend = Arc::new(StandaloneBackend::new(repository_root));

    let mut server = ServerInstance::build(config, backend).await?;
    server.start().await?;
    stop_on_signal(server.handle());
    server.join().await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "launcher failed");
            ExitCode::from(err.exit_code())
        }
    }
}
