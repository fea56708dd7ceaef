//! Per-connection session state machine.
//!
//! Every accepted connection owns one [`Session`]. The socket reader turns
//! transport activity into a sequential stream of [`ConnectionEvent`]s and
//! folds each one through [`Session::apply`]:
//!
//! ```text
//! Connecting --Opened--> Open --Frame--> Open
//!     |                   |
//!     +--Closed/Errored---+--> Closed | Errored
//! ```
//!
//! Reaching `Closed` or `Errored` unregisters the connection, which in turn
//! releases its key and rebroadcasts presence. Events after that are ignored.

use axum::body::Bytes;

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::relay::RelayState;
use crate::router;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, not yet open for frames.
    Connecting,
    /// Frames are being routed.
    Open,
    /// Closed normally by either side.
    Closed,
    /// Torn down by a transport error.
    Errored,
}

impl ConnectionState {
    /// Whether no further events will be processed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

/// Something that happened on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The transport is ready.
    Opened,
    /// One inbound frame (expected to hold a UTF-8 JSON envelope).
    Frame(Bytes),
    /// The peer closed the connection or the stream ended.
    Closed,
    /// The transport failed.
    Errored(String),
}

impl ConnectionEvent {
    /// Convenience constructor for a text frame.
    #[must_use]
    pub fn text(frame: impl Into<String>) -> Self {
        Self::Frame(Bytes::from(frame.into()))
    }
}

/// One connection and, once logged in, the username it claimed.
#[derive(Debug)]
pub struct Session {
    handle: ConnectionHandle,
    state: ConnectionState,
    username: Option<String>,
}

impl Session {
    /// Creates an anonymous session in the `Connecting` state.
    #[must_use]
    pub const fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            state: ConnectionState::Connecting,
            username: None,
        }
    }

    /// The connection's id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// The connection's outbound handle.
    #[must_use]
    pub const fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// The username claimed at login, if any.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub(crate) fn set_username(&mut self, username: String) {
        self.username = Some(username);
    }

    /// Folds one event into the session and returns the resulting state.
    pub fn apply(&mut self, event: ConnectionEvent, relay: &RelayState) -> ConnectionState {
        match (self.state, event) {
            (ConnectionState::Connecting, ConnectionEvent::Opened) => {
                self.state = ConnectionState::Open;
            }
            (ConnectionState::Open, ConnectionEvent::Frame(frame)) => {
                router::handle_frame(relay, self, &frame);
            }
            (ConnectionState::Connecting | ConnectionState::Open, ConnectionEvent::Closed) => {
                self.state = ConnectionState::Closed;
                self.release(relay);
            }
            (ConnectionState::Connecting | ConnectionState::Open, ConnectionEvent::Errored(reason)) => {
                tracing::warn!(
                    conn = %self.id(),
                    username = ?self.username,
                    reason = %reason,
                    "connection errored"
                );
                self.state = ConnectionState::Errored;
                self.release(relay);
            }
            (state, event) => {
                tracing::trace!(conn = %self.id(), ?state, ?event, "ignoring event");
            }
        }
        self.state
    }

    fn release(&self, relay: &RelayState) {
        match relay.disconnect(self.id()) {
            Some(username) => {
                tracing::info!(conn = %self.id(), username = %username, "user disconnected");
            }
            None => tracing::debug!(conn = %self.id(), "connection closed before login"),
        }
    }
}
