//! Bidirectional message channel handed to a realtime endpoint.

use bytes::Bytes;
use tokio::sync::mpsc;

/// A single message travelling over a session, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    /// A UTF-8 text frame.
    Text(String),
    /// A binary frame.
    Binary(Bytes),
    /// Closes the channel with an optional reason.
    Close(Option<String>),
}

/// Returned by [`Session::send`] once the peer side of the channel is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session closed")]
pub struct SessionClosed;

/// One accepted message channel.
///
/// Messages are delivered in the order they were sent, per direction.
/// `recv()` returns `None` once the client has disconnected or closed the
/// channel; dropping the session (or calling [`Session::close`]) ends the
/// outbound side.
#[derive(Debug)]
pub struct Session {
    id: u64,
    path: String,
    inbound: mpsc::Receiver<ChannelMessage>,
    outbound: mpsc::Sender<ChannelMessage>,
}

impl Session {
    #[must_use]
    pub fn new(
        id: u64,
        path: impl Into<String>,
        inbound: mpsc::Receiver<ChannelMessage>,
        outbound: mpsc::Sender<ChannelMessage>,
    ) -> Self {
        Self {
            id,
            path: path.into(),
            inbound,
            outbound,
        }
    }

    /// Server-assigned identifier, unique per process.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The endpoint path the client connected to.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Receives the next inbound message.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.inbound.recv().await
    }

    /// Sends a message to the client, waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] when the connection has gone away.
    pub async fn send(&self, message: ChannelMessage) -> Result<(), SessionClosed> {
        self.outbound.send(message).await.map_err(|_| SessionClosed)
    }

    /// Returns a cloneable sender for pushing messages from other tasks.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<ChannelMessage> {
        self.outbound.clone()
    }

    /// Sends a close frame and consumes the session.
    pub async fn close(self, reason: Option<String>) {
        let _ = self.outbound.send(ChannelMessage::Close(reason)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_flow_in_send_order() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let mut session = Session::new(7, "/git", in_rx, out_tx);

        in_tx.send(ChannelMessage::Text("a".into())).await.unwrap();
        in_tx.send(ChannelMessage::Text("b".into())).await.unwrap();
        drop(in_tx);

        assert_eq!(session.recv().await, Some(ChannelMessage::Text("a".into())));
        assert_eq!(session.recv().await, Some(ChannelMessage::Text("b".into())));
        assert_eq!(session.recv().await, None);

        session.send(ChannelMessage::Binary(Bytes::from_static(b"x"))).await.unwrap();
        session.close(Some("done".into())).await;

        assert_eq!(
            out_rx.recv().await,
            Some(ChannelMessage::Binary(Bytes::from_static(b"x")))
        );
        assert_eq!(out_rx.recv().await, Some(ChannelMessage::Close(Some("done".into()))));
    }

    #[tokio::test]
    async fn send_fails_after_peer_dropped() {
        let (_in_tx, in_rx) = mpsc::channel(1);
        let (out_tx, out_rx) = mpsc::channel(1);
        let session = Session::new(1, "/checkconsistency", in_rx, out_tx);
        drop(out_rx);

        let result = session.send(ChannelMessage::Text("late".into())).await;
        assert_eq!(result, Err(SessionClosed));
        assert_eq!(session.path(), "/checkconsistency");
        assert_eq!(session.id(), 1);
    }
}
