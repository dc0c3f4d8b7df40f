//! Websocket sessions for discovered realtime endpoints.
//!
//! Each upgraded connection runs a reader task and a writer task around the
//! endpoint's `on_session` call. The writer drains a bounded channel, so
//! outbound messages keep their send order.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use winery_launcher_core::{ChannelMessage, RealtimeEndpoint, Session};

use crate::network::config::ConnectionConfig;
use crate::network::connection::ConnectionRegistry;
use crate::network::shutdown::LifecycleController;

/// Shared resources every session needs.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub config: Arc<ConnectionConfig>,
    pub lifecycle: Arc<LifecycleController>,
}

/// Completes the upgrade and hands the socket to `endpoint`.
pub fn open_session(
    upgrade: WebSocketUpgrade,
    endpoint: Arc<dyn RealtimeEndpoint>,
    path: String,
    remote_addr: Option<SocketAddr>,
    context: SessionContext,
) -> Response {
    upgrade
        .write_buffer_size(context.config.ws_write_buffer_size)
        .max_write_buffer_size(context.config.ws_max_write_buffer_size)
        .on_failed_upgrade(|err| debug!(error = %err, "websocket upgrade failed"))
        .on_upgrade(move |socket| run_session(socket, endpoint, path, remote_addr, context))
}

async fn run_session(
    socket: WebSocket,
    endpoint: Arc<dyn RealtimeEndpoint>,
    path: String,
    remote_addr: Option<SocketAddr>,
    context: SessionContext,
) {
    let _guard = context.lifecycle.in_flight_guard();
    let (handle, outbound_rx) = context.registry.register(&path, remote_addr, &context.config);
    let id = handle.id;
    let (inbound_tx, inbound_rx) = mpsc::channel(context.config.inbound_channel_capacity);
    let session = Session::new(id.0, path.clone(), inbound_rx, handle.tx.clone());
    drop(handle);

    info!(session = id.0, path = %path, peer = ?remote_addr, "session opened");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, outbound_rx));
    let reader = tokio::spawn(read_loop(stream, inbound_tx, id.0));

    let completed = tokio::select! {
        result = endpoint.on_session(session) => {
            if let Err(err) = result {
                warn!(session = id.0, path = %path, error = %format!("{err:#}"), "endpoint failed");
            }
            true
        }
        () = context.lifecycle.force_closed() => {
            warn!(session = id.0, path = %path, "session cancelled at drain deadline");
            false
        }
    };

    // Dropping the registry's handle releases the last outbound sender held
    // by the server, which lets the writer send its close frame and exit.
    context.registry.remove(id);
    if completed {
        let _ = writer.await;
    } else {
        writer.abort();
    }
    reader.abort();

    info!(session = id.0, path = %path, "session closed");
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ChannelMessage>,
) {
    while let Some(message) = outbound.recv().await {
        let (frame, last) = match message {
            ChannelMessage::Text(text) => (Message::Text(text.into()), false),
            ChannelMessage::Binary(bytes) => (Message::Binary(bytes), false),
            ChannelMessage::Close(reason) => (close_message(reason), true),
        };
        if sink.send(frame).await.is_err() || last {
            return;
        }
    }
    let _ = sink.send(close_message(None)).await;
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    inbound: mpsc::Sender<ChannelMessage>,
    session: u64,
) {
    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(Message::Text(text)) => ChannelMessage::Text(text.as_str().to_owned()),
            Ok(Message::Binary(bytes)) => ChannelMessage::Binary(bytes),
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(err) => {
                debug!(session, error = %err, "websocket read failed");
                break;
            }
        };
        if inbound.send(message).await.is_err() {
            break;
        }
    }
}

fn close_message(reason: Option<String>) -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: reason.unwrap_or_default().into(),
    }))
}
