//! Relay server core: shared state, WebSocket handler, and server startup.
//!
//! The relay accepts WebSocket connections on `/ws`, runs one
//! [`Session`] per connection, and routes JSON envelopes between logged-in
//! users. The connection registry and the public-key store are the only
//! state shared between connections; both live in one [`Directory`] behind
//! a single lock so every registry/key-store operation is atomic.

use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::keys::PublicKeyStore;
use crate::presence;
use crate::registry::ConnectionRegistry;
use crate::session::{ConnectionEvent, Session};

/// Default maximum accepted inbound frame size in bytes (64 KB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default number of frames buffered per connection before dropping.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Tunables that shape routing behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    /// Inbound frames larger than this are dropped.
    pub max_frame_size: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
    /// Whether a `privateChat` sender receives a copy of its own message.
    pub echo_private_chat: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            echo_private_chat: false,
        }
    }
}

/// Who is online and which keys they advertised.
#[derive(Debug, Default)]
pub struct Directory {
    /// Logged-in connections.
    pub registry: ConnectionRegistry,
    /// Public keys by username.
    pub keys: PublicKeyStore,
}

/// Shared relay server state.
pub struct RelayState {
    directory: RwLock<Directory>,
    options: RelayOptions,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a relay with an empty directory and default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(RelayOptions::default())
    }

    /// Creates a relay with an empty directory and custom options.
    #[must_use]
    pub fn with_options(options: RelayOptions) -> Self {
        Self {
            directory: RwLock::new(Directory::default()),
            options,
        }
    }

    /// Returns the routing options.
    #[must_use]
    pub const fn options(&self) -> &RelayOptions {
        &self.options
    }

    /// Read access to the directory. Do not hold the guard across an await.
    pub fn directory(&self) -> RwLockReadGuard<'_, Directory> {
        self.directory.read()
    }

    /// Registers a connection under `username`, stores its key if given, and
    /// broadcasts the new user list.
    ///
    /// If the connection was already logged in under another name and no
    /// other connection still uses that name, the old name's key is dropped.
    /// Returns the number of logged-in connections afterwards.
    pub fn login(
        &self,
        handle: &ConnectionHandle,
        username: &str,
        pub_key: Option<String>,
    ) -> usize {
        let mut directory = self.directory.write();
        let Directory { registry, keys } = &mut *directory;

        if let Some(previous) = registry.register(handle, username)
            && previous != username
            && !registry.contains_username(&previous)
        {
            keys.remove_key(&previous);
        }
        if let Some(key) = pub_key {
            keys.set_key(username, key);
        }

        presence::broadcast(registry);
        registry.len()
    }

    /// Removes a connection from the registry, drops its user's key once no
    /// connection holds that username, and broadcasts the new user list.
    ///
    /// Returns the username that was removed. Disconnecting a connection
    /// that is not registered (never logged in, or already removed) changes
    /// nothing and broadcasts nothing.
    pub fn disconnect(&self, id: ConnectionId) -> Option<String> {
        let mut directory = self.directory.write();
        let Directory { registry, keys } = &mut *directory;

        let username = registry.unregister(id)?;
        if !registry.contains_username(&username) {
            keys.remove_key(&username);
        }

        presence::broadcast(registry);
        Some(username)
    }

    /// Snapshot of every logged-in username.
    #[must_use]
    pub fn online_usernames(&self) -> Vec<String> {
        self.directory.read().registry.list_usernames()
    }

    /// Number of logged-in connections.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.directory.read().registry.len()
    }

    /// Send a WebSocket Close frame to every logged-in connection.
    ///
    /// Each writer task forwards the frame and exits, which tears down the
    /// connection and runs the normal disconnect cleanup. Used for graceful
    /// shutdown.
    pub fn close_all_connections(&self) {
        let directory = self.directory.read();
        for handle in directory.registry.connections() {
            tracing::info!(conn = %handle.id(), "sending close frame");
            handle.send_frame(Message::Close(None));
        }
    }
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Create the outbound queue and fold `Opened` into a new [`Session`].
/// 2. Spawn a writer task draining the queue into the socket.
/// 3. Spawn a reader task folding every inbound frame, close, or transport
///    error into the session state machine.
/// 4. When either task ends, abort the other and make sure the connection
///    is unregistered.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (handle, mut rx) = ConnectionHandle::channel(state.options().outbound_buffer);
    let conn_id = handle.id();
    let mut session = Session::new(handle);
    session.apply(ConnectionEvent::Opened, &state);
    tracing::info!(conn = %conn_id, "connection accepted");

    let write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn = %conn_id, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let read_task = tokio::spawn(async move {
        while let Some(next) = ws_receiver.next().await {
            let event = match next {
                Ok(Message::Text(text)) => ConnectionEvent::text(text.as_str()),
                Ok(Message::Binary(data)) => ConnectionEvent::Frame(data),
                Ok(Message::Close(_)) => ConnectionEvent::Closed,
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Err(e) => ConnectionEvent::Errored(e.to_string()),
            };
            if session.apply(event, &reader_state).is_terminal() {
                return;
            }
        }
        session.apply(ConnectionEvent::Closed, &reader_state);
    });

    finish_connection(&state, conn_id, read_task, write_task).await;
}

/// Waits for either connection task to end, stops the other, and unregisters
/// the connection.
///
/// When the writer ends first, the aborted reader is awaited so a frame it is
/// still applying cannot register the connection after cleanup.
async fn finish_connection(
    state: &RelayState,
    conn_id: ConnectionId,
    mut read_task: JoinHandle<()>,
    mut write_task: JoinHandle<()>,
) {
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
            let _ = read_task.await;
        }
    }

    // The reader already cleaned up unless the writer side ended first.
    if let Some(username) = state.disconnect(conn_id) {
        tracing::info!(conn = %conn_id, username = %username, "writer closed, user unregistered");
    }
    tracing::info!(conn = %conn_id, "connection closed");
}

/// Builds the axum router serving `/ws` and `/health`.
pub fn router(state: Arc<RelayState>) -> axum::Router {
    axum::Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// Use [`RelayState::with_options`] to build a state from the resolved
/// [`crate::config::RelayConfig`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_shutdown(addr, state, std::future::pending()).await
}

/// Starts the relay server and stops accepting connections once `shutdown`
/// resolves.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_shutdown<F>(
    addr: &str,
    state: Arc<RelayState>,
    shutdown: F,
) -> Result<
    (std::net::SocketAddr, JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Starts the relay server in-process for testing.
///
/// Binds to `127.0.0.1:0` (OS-assigned port) and returns the bound address
/// and a [`tokio::task::JoinHandle`] for cleanup.
#[cfg(test)]
pub async fn start_test_server() -> (std::net::SocketAddr, JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server")
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Body of the `/health` response.
#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    online: usize,
}

async fn health_handler(State(state): State<Arc<RelayState>>) -> axum::Json<HealthReport> {
    axum::Json(HealthReport {
        status: "ok",
        online: state.online_count(),
    })
}
