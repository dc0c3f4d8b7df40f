//! End-to-end tests against a real listener on an OS-assigned port.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::Method;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use winery_launcher::network::MountConfig;
use winery_launcher::{
    ConfigurationError, LauncherConfig, LauncherError, LifecycleState, ServerHandle, ServerInstance,
};
use winery_launcher_core::{handler_fn, Backend, ComponentCatalog, RealtimeEndpoint, Session};

const RESOURCES: &str = "winery::rest::resources";
const WEBSOCKETS: &str = "winery::rest::websockets";

#[derive(Default)]
struct FixtureBackend {
    initialized: AtomicBool,
    counted_hits: Arc<AtomicUsize>,
    slow_entered: Arc<Notify>,
    stuck_entered: Arc<Notify>,
    stuck_finished: Arc<AtomicBool>,
    duplicate_endpoint: bool,
}

struct Echo(&'static str);

#[async_trait]
impl RealtimeEndpoint for Echo {
    fn path(&self) -> &str {
        self.0
    }

    async fn on_session(&self, mut session: Session) -> anyhow::Result<()> {
        while let Some(message) = session.recv().await {
            if session.send(message).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for FixtureBackend {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn repository_root(&self) -> Option<PathBuf> {
        None
    }

    fn register_components(&self, catalog: &mut ComponentCatalog) -> anyhow::Result<()> {
        catalog.register_resource(
            RESOURCES,
            "root",
            [Method::GET],
            "/",
            handler_fn(|_req, _params| async {
                Ok(http::Response::new(Bytes::from_static(b"<html><head><title></title></head></html>")))
            }),
        )?;

        let hits = Arc::clone(&self.counted_hits);
        catalog.register_resource(
            RESOURCES,
            "counted",
            [Method::POST],
            "/servicetemplates/{id}",
            handler_fn(move |_req, params| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    let id = params.get("id").unwrap_or_default().to_string();
                    Ok(http::Response::new(Bytes::from(id)))
                }
            }),
        )?;

        catalog.register_resource(
            RESOURCES,
            "failing",
            [Method::GET],
            "/fail",
            handler_fn(|_req, _params| async { Err(anyhow::anyhow!("repository offline")) }),
        )?;

        let entered = Arc::clone(&self.slow_entered);
        catalog.register_resource(
            RESOURCES,
            "slow",
            [Method::GET],
            "/slow",
            handler_fn(move |_req, _params| {
                let entered = Arc::clone(&entered);
                async move {
                    entered.notify_one();
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok(http::Response::new(Bytes::from_static(b"finished")))
                }
            }),
        )?;

        let entered = Arc::clone(&self.stuck_entered);
        let finished = Arc::clone(&self.stuck_finished);
        catalog.register_resource(
            RESOURCES,
            "stuck",
            [Method::GET],
            "/stuck",
            handler_fn(move |_req, _params| {
                let entered = Arc::clone(&entered);
                let finished = Arc::clone(&finished);
                async move {
                    entered.notify_one();
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    finished.store(true, Ordering::SeqCst);
                    Ok(http::Response::new(Bytes::from_static(b"too late")))
                }
            }),
        )?;

        catalog.register_endpoint(WEBSOCKETS, "checkconsistency", || {
            Ok(Arc::new(Echo("/checkconsistency")) as Arc<dyn RealtimeEndpoint>)
        })?;
        catalog.register_endpoint(WEBSOCKETS, "git", || {
            Ok(Arc::new(Echo("/git")) as Arc<dyn RealtimeEndpoint>)
        })?;
        if self.duplicate_endpoint {
            catalog.register_endpoint(WEBSOCKETS, "gitmirror", || {
                Ok(Arc::new(Echo("/git")) as Arc<dyn RealtimeEndpoint>)
            })?;
        }
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn bundles() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let modeler = dir.path().join("topologymodeler");
    let management = dir.path().join("tosca-management");
    std::fs::create_dir_all(&modeler).unwrap();
    std::fs::create_dir_all(management.join("assets")).unwrap();
    std::fs::write(
        modeler.join("index.html"),
        "<!DOCTYPE html><html><head><title>Winery: Topologymodeler</title></head></html>",
    )
    .unwrap();
    std::fs::write(
        management.join("index.html"),
        "<!DOCTYPE html><html><head><title>Winery Repository</title></head></html>",
    )
    .unwrap();
    std::fs::write(management.join("assets").join("app.js"), "console.log('winery');").unwrap();
    dir
}

fn config(bundle: &TempDir, port: u16) -> LauncherConfig {
    LauncherConfig {
        host: "127.0.0.1".to_string(),
        port,
        mounts: MountConfig::defaults_under(bundle.path()),
        drain_timeout: Duration::from_secs(3),
        ..LauncherConfig::default()
    }
}

struct Running {
    addr: SocketAddr,
    handle: ServerHandle,
    join: JoinHandle<Result<(), LauncherError>>,
    _bundle: TempDir,
}

impl Running {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{path}", self.addr)
    }

    async fn stop_and_join(self) {
        self.handle.stop();
        tokio::time::timeout(Duration::from_secs(5), self.join)
            .await
            .expect("server did not stop within the drain bound")
            .unwrap()
            .unwrap();
    }
}

async fn launch(backend: Arc<FixtureBackend>) -> Running {
    launch_with_drain(backend, Duration::from_secs(3)).await
}

async fn launch_with_drain(backend: Arc<FixtureBackend>, drain_timeout: Duration) -> Running {
    let bundle = bundles();
    let config = LauncherConfig {
        drain_timeout,
        ..config(&bundle, 0)
    };
    let mut server = ServerInstance::build(config, backend).await.unwrap();
    let addr = server.start().await.unwrap();
    let handle = server.handle();
    let join = tokio::spawn(server.join());
    Running {
        addr,
        handle,
        join,
        _bundle: bundle,
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn mounts_serve_bundles_by_longest_prefix() {
    let server = launch(Arc::new(FixtureBackend::default())).await;
    let client = client();

    let modeler = client.get(server.url("/winery-topologymodeler/")).send().await.unwrap();
    assert_eq!(modeler.status(), 200);
    assert!(modeler.text().await.unwrap().contains("<title>Winery: Topologymodeler</title>"));

    let management = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(management.status(), 200);
    assert!(management.text().await.unwrap().contains("<title>Winery Repository</title>"));

    let asset = client.get(server.url("/assets/app.js")).send().await.unwrap();
    assert_eq!(asset.status(), 200);
    assert_eq!(asset.bytes().await.unwrap().as_ref(), b"console.log('winery');");

    let missing = client.get(server.url("/assets/missing.js")).send().await.unwrap();
    assert_eq!(missing.status(), 404);

    let redirect = client.get(server.url("/winery-topologymodeler")).send().await.unwrap();
    assert_eq!(redirect.status(), 308);
    assert_eq!(redirect.headers()["location"], "/winery-topologymodeler/");

    server.stop_and_join().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn api_prefix_carries_cors_policy() {
    let server = launch(Arc::new(FixtureBackend::default())).await;
    let client = client();

    let root = client.get(server.url("/winery/")).send().await.unwrap();
    assert_eq!(root.status(), 200);
    let headers = root.headers();
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert_eq!(headers["access-control-allow-methods"], "GET,PUT,POST,DELETE,HEAD,OPTIONS");
    assert_eq!(
        headers["access-control-allow-headers"],
        "X-Requested-With,Content-Type,Accept,Origin"
    );
    assert!(headers.contains_key("x-request-id"));
    assert!(root.text().await.unwrap().contains("<title></title>"));

    let preflight = client
        .request(reqwest::Method::OPTIONS, server.url("/winery/servicetemplates/Shop"))
        .header("origin", "http://localhost:4200")
        .send()
        .await
        .unwrap();
    assert_eq!(preflight.status(), 200);
    assert_eq!(preflight.headers()["access-control-allow-origin"], "*");
    assert!(preflight.bytes().await.unwrap().is_empty());

    let static_page = client.get(server.url("/")).send().await.unwrap();
    assert!(static_page.headers().get("access-control-allow-origin").is_none());

    server.stop_and_join().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn dispatcher_invokes_at_most_one_handler() {
    let backend = Arc::new(FixtureBackend::default());
    let hits = Arc::clone(&backend.counted_hits);
    let server = launch(backend).await;
    let client = client();

    let matched = client
        .post(server.url("/winery/servicetemplates/Shop"))
        .send()
        .await
        .unwrap();
    assert_eq!(matched.status(), 200);
    assert_eq!(matched.text().await.unwrap(), "Shop");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let unmatched = client.get(server.url("/winery/nodetypes/")).send().await.unwrap();
    assert_eq!(unmatched.status(), 404);
    assert_eq!(unmatched.headers()["access-control-allow-origin"], "*");

    let wrong_method = client
        .delete(server.url("/winery/servicetemplates/Shop"))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_method.status(), 404);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let failed = client.get(server.url("/winery/fail")).send().await.unwrap();
    assert_eq!(failed.status(), 500);

    server.stop_and_join().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn discovery_is_idempotent_across_compositions() {
    let first_bundle = bundles();
    let second_bundle = bundles();
    let first = ServerInstance::build(config(&first_bundle, 0), Arc::new(FixtureBackend::default()))
        .await
        .unwrap();
    let second = ServerInstance::build(config(&second_bundle, 0), Arc::new(FixtureBackend::default()))
        .await
        .unwrap();

    assert_eq!(first.endpoints(), second.endpoints());
    let paths: Vec<&str> = first.endpoints().iter().map(|d| d.path.as_str()).collect();
    assert_eq!(paths, ["/checkconsistency", "/git"]);
    assert!(first.discovery_warnings().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_endpoint_paths_fail_before_binding() {
    let port = {
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        spare.local_addr().unwrap().port()
    };
    let bundle = bundles();
    let backend = Arc::new(FixtureBackend {
        duplicate_endpoint: true,
        ..FixtureBackend::default()
    });

    let result = ServerInstance::build(config(&bundle, port), backend).await;
    let Err(err) = result else {
        panic!("composition with duplicate endpoint paths must fail");
    };
    assert_eq!(err.exit_code(), 2);
    match err {
        LauncherError::Configuration(ConfigurationError::DuplicateEndpointPath { path, first, second }) => {
            assert_eq!(path, "/winery/git");
            assert_eq!(first, "winery::rest::websockets::git");
            assert_eq!(second, "winery::rest::websockets::gitmirror");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_drains_in_flight_and_refuses_new_connections() {
    let backend = Arc::new(FixtureBackend::default());
    let entered = Arc::clone(&backend.slow_entered);
    let server = launch(backend).await;
    let addr = server.addr;

    let slow = tokio::spawn(client().get(server.url("/winery/slow")).send());
    entered.notified().await;

    server.handle.stop();
    assert_eq!(server.handle.state(), LifecycleState::Draining);

    let response = slow.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "finished");

    let handle = server.handle.clone();
    server.stop_and_join().await;
    assert_eq!(handle.state(), LifecycleState::Stopped);
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn drain_deadline_cancels_handlers_before_backend_closes() {
    let backend = Arc::new(FixtureBackend::default());
    let entered = Arc::clone(&backend.stuck_entered);
    let finished = Arc::clone(&backend.stuck_finished);
    let server = launch_with_drain(Arc::clone(&backend), Duration::from_millis(300)).await;

    let stuck = tokio::spawn(client().get(server.url("/winery/stuck")).send());
    entered.notified().await;

    let handle = server.handle.clone();
    let started = std::time::Instant::now();
    server.stop_and_join().await;
    assert!(started.elapsed() < Duration::from_secs(2), "drain was not bounded");
    assert_eq!(handle.state(), LifecycleState::Stopped);
    assert!(!backend.is_initialized());

    match stuck.await.unwrap() {
        Ok(response) => assert_eq!(response.status(), 503),
        Err(err) => assert!(!err.is_timeout(), "unexpected client error: {err}"),
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!finished.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_token_mismatch_changes_nothing() {
    let server = launch(Arc::new(FixtureBackend::default())).await;
    let client = client();

    for uri in ["/shutdown?token=wrong", "/shutdown"] {
        let denied = client.post(server.url(uri)).send().await.unwrap();
        assert_eq!(denied.status(), 403);
        assert!(denied.bytes().await.unwrap().is_empty());
    }
    assert_eq!(server.handle.state(), LifecycleState::Started);

    let still_serving = client.get(server.url("/winery/")).send().await.unwrap();
    assert_eq!(still_serving.status(), 200);

    server.stop_and_join().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_with_token_terminates_within_drain_bound() {
    let server = launch(Arc::new(FixtureBackend::default())).await;

    let accepted = client()
        .post(server.url("/shutdown?token=winery"))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), 200);

    let addr = server.addr;
    tokio::time::timeout(Duration::from_secs(5), server.join)
        .await
        .expect("server did not stop within the drain bound")
        .unwrap()
        .unwrap();
    assert_eq!(server.handle.state(), LifecycleState::Stopped);
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn websocket_upgrade_on_discovered_path_keeps_order() {
    let server = launch(Arc::new(FixtureBackend::default())).await;

    let (mut socket, response) = tokio_tungstenite::connect_async(server.ws_url("/winery/checkconsistency"))
        .await
        .unwrap();
    assert_eq!(response.status(), 101);

    for n in 0..20 {
        socket.send(Message::Text(format!("msg-{n}").into())).await.unwrap();
    }
    for n in 0..20 {
        let message = socket.next().await.unwrap().unwrap();
        assert_eq!(message, Message::Text(format!("msg-{n}").into()));
    }

    socket.close(None).await.unwrap();
    server.stop_and_join().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn websocket_upgrade_on_unregistered_path_fails() {
    let server = launch(Arc::new(FixtureBackend::default())).await;

    let err = tokio_tungstenite::connect_async(server.ws_url("/winery/refinetopology"))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 404),
        other => panic!("unexpected error: {other}"),
    }

    server.stop_and_join().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_sends_close_frame_to_open_sessions() {
    let server = launch(Arc::new(FixtureBackend::default())).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(server.ws_url("/winery/git"))
        .await
        .unwrap();
    socket.send(Message::Text("ping".into())).await.unwrap();
    assert_eq!(socket.next().await.unwrap().unwrap(), Message::Text("ping".into()));

    server.handle.stop();
    let closing = tokio::time::timeout(Duration::from_secs(3), socket.next())
        .await
        .expect("no close frame before timeout");
    assert!(matches!(closing, Some(Ok(Message::Close(_))) | None));
    // Reading again flushes the client's close reply, which ends the session.
    let _ = tokio::time::timeout(Duration::from_secs(1), socket.next()).await;

    tokio::time::timeout(Duration::from_secs(5), server.join)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
