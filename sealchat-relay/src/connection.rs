//! Connection handles and non-blocking outbound delivery.
//!
//! A [`ConnectionHandle`] is the relay's only way to reach a client: a
//! process-unique [`ConnectionId`] plus the sender half of that connection's
//! bounded outbound queue. The queue is drained by the connection's writer
//! task, so pushing into it never waits on the client.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use sealchat_proto::codec;
use sealchat_proto::envelope::ServerMessage;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Source of connection ids. Starts at 1 so `conn-0` never appears in logs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one accepted connection, unique for the process lifetime.
///
/// Ids increase in accept order, which gives the registry a stable
/// iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a frame could not be queued for a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The connection's writer has shut down.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
    /// The connection is not draining its queue fast enough.
    #[error("outbound buffer for connection {0} is full")]
    Full(ConnectionId),
}

/// Cloneable reference to a live connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<Message>,
}

impl ConnectionHandle {
    /// Wraps an existing outbound sender under a freshly allocated id.
    #[must_use]
    pub fn new(outbound: mpsc::Sender<Message>) -> Self {
        Self {
            id: ConnectionId::next(),
            outbound,
        }
    }

    /// Creates a handle together with the receiver its writer task drains.
    ///
    /// A `capacity` of zero is raised to one.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Returns this connection's id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Full`] when the buffer is at capacity (the
    /// frame is dropped) and [`DeliveryError::Closed`] when the connection
    /// is shutting down.
    pub fn deliver(&self, frame: Message) -> Result<(), DeliveryError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full(self.id),
            TrySendError::Closed(_) => DeliveryError::Closed(self.id),
        })
    }

    /// Queues a frame, logging instead of returning a failure.
    ///
    /// Returns `true` if the frame was queued.
    pub fn send_frame(&self, frame: Message) -> bool {
        match self.deliver(frame) {
            Ok(()) => true,
            Err(e @ DeliveryError::Full(_)) => {
                tracing::warn!(conn = %self.id, error = %e, "dropping frame for slow connection");
                false
            }
            Err(e @ DeliveryError::Closed(_)) => {
                tracing::debug!(conn = %self.id, error = %e, "send to closing connection skipped");
                false
            }
        }
    }

    /// Encodes and queues a single server envelope.
    ///
    /// Returns `true` if the frame was queued.
    pub fn send(&self, msg: &ServerMessage) -> bool {
        encode_frame(msg).is_some_and(|frame| self.send_frame(frame))
    }
}

/// Encodes a server envelope into a WebSocket text frame.
///
/// Fan-out paths encode once and clone the frame per recipient. Returns
/// `None` (after logging) if encoding fails.
#[must_use]
pub fn encode_frame(msg: &ServerMessage) -> Option<Message> {
    match codec::encode_server(msg) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode server envelope");
            None
        }
    }
}
