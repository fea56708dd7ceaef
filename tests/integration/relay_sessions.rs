// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::doc_markdown
)]

//! End-to-end tests for relay sessions: login, presence, broadcast and
//! private routing over real WebSocket connections.
//!
//! Every test starts an in-process relay on `127.0.0.1:0` and drives it with
//! `tokio-tungstenite` clients speaking the JSON envelope protocol.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sealchat_proto::codec;
use sealchat_proto::envelope::{ClientMessage, ServerMessage};
use sealchat_relay::relay::{self, RelayOptions, RelayState};
use tokio_tungstenite::tungstenite::Message;

type Ws =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_PERIOD: Duration = Duration::from_millis(300);

// =============================================================================
// Helpers
// =============================================================================

async fn start_relay() -> SocketAddr {
    let (addr, _handle) = relay::start_server("127.0.0.1:0").await.unwrap();
    addr
}

async fn start_relay_with(options: RelayOptions) -> SocketAddr {
    let state = Arc::new(RelayState::with_options(options));
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", state)
        .await
        .unwrap();
    addr
}

async fn connect(addr: SocketAddr) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut Ws, msg: &ClientMessage) {
    let text = codec::encode_client(msg).unwrap();
    ws.send(Message::Text(text.into())).await.unwrap();
}

async fn send_raw(ws: &mut Ws, text: &str) {
    ws.send(Message::Text(text.into())).await.unwrap();
}

/// Next server envelope, failing the test after [`RECV_TIMEOUT`].
async fn recv(ws: &mut Ws) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("recv timed out")
            .expect("stream ended")
            .unwrap();
        match frame {
            Message::Text(text) => return codec::decode_server(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Next envelope that is not a presence update.
async fn recv_routed(ws: &mut Ws) -> ServerMessage {
    loop {
        match recv(ws).await {
            ServerMessage::UserList { .. } => {}
            other => return other,
        }
    }
}

/// Reads user lists until one matches `expected` (order-insensitive).
async fn wait_for_users(ws: &mut Ws, expected: &[&str]) {
    let mut expected: Vec<String> = expected.iter().map(ToString::to_string).collect();
    expected.sort();
    loop {
        if let ServerMessage::UserList { mut users } = recv(ws).await {
            users.sort();
            if users == expected {
                return;
            }
        }
    }
}

/// Asserts that nothing but presence updates arrives for a short while.
async fn assert_no_routed(ws: &mut Ws) {
    let quiet = tokio::time::timeout(QUIET_PERIOD, recv_routed(ws)).await;
    assert!(quiet.is_err(), "unexpected envelope: {quiet:?}");
}

async fn login(addr: SocketAddr, username: &str, online: &[&str]) -> Ws {
    let mut ws = connect(addr).await;
    send(
        &mut ws,
        &ClientMessage::Login {
            username: username.to_string(),
            pub_key: Some(format!("pk-{username}")),
        },
    )
    .await;
    wait_for_users(&mut ws, online).await;
    ws
}

fn private_chat(to: &str, message: &str) -> ClientMessage {
    ClientMessage::PrivateChat {
        from: String::new(),
        to: to.to_string(),
        message: message.to_string(),
        nonce: Some("bm9uY2U=".to_string()),
        timestamp: Some("2024-05-01T10:00:00.000Z".to_string()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn login_announces_presence_to_everyone() {
    let addr = start_relay().await;

    let mut alice = login(addr, "alice", &["alice"]).await;
    let mut bob = login(addr, "bob", &["alice", "bob"]).await;
    wait_for_users(&mut alice, &["alice", "bob"]).await;

    let _carol = login(addr, "carol", &["alice", "bob", "carol"]).await;
    wait_for_users(&mut alice, &["alice", "bob", "carol"]).await;
    wait_for_users(&mut bob, &["alice", "bob", "carol"]).await;
}

#[tokio::test]
async fn private_chat_reaches_only_the_recipient() {
    let addr = start_relay().await;

    let mut alice = login(addr, "alice", &["alice"]).await;
    let mut bob = login(addr, "bob", &["alice", "bob"]).await;
    let mut carol = login(addr, "carol", &["alice", "bob", "carol"]).await;
    wait_for_users(&mut alice, &["alice", "bob", "carol"]).await;

    send(
        &mut alice,
        &ClientMessage::PrivateChat {
            from: "alice".to_string(),
            to: "bob".to_string(),
            message: "ciphertext".to_string(),
            nonce: Some("nonce".to_string()),
            timestamp: Some("2024-05-01T10:00:00.000Z".to_string()),
        },
    )
    .await;

    assert_eq!(
        recv_routed(&mut bob).await,
        ServerMessage::PrivateChat {
            from: "alice".to_string(),
            to: "bob".to_string(),
            message: "ciphertext".to_string(),
            nonce: Some("nonce".to_string()),
            timestamp: Some("2024-05-01T10:00:00.000Z".to_string()),
        }
    );
    assert_no_routed(&mut bob).await;
    assert_no_routed(&mut alice).await;
    assert_no_routed(&mut carol).await;
}

#[tokio::test]
async fn chat_reaches_every_other_user() {
    let addr = start_relay().await;

    let mut alice = login(addr, "alice", &["alice"]).await;
    let mut bob = login(addr, "bob", &["alice", "bob"]).await;
    let mut carol = login(addr, "carol", &["alice", "bob", "carol"]).await;
    wait_for_users(&mut alice, &["alice", "bob", "carol"]).await;

    send_raw(
        &mut alice,
        r#"{"type":"chat","from":"alice","message":"hello","timestamp":"2024-05-01T10:00:00.000Z"}"#,
    )
    .await;

    let expected = ServerMessage::Chat {
        from: "alice".to_string(),
        message: "hello".to_string(),
        timestamp: "2024-05-01T10:00:00.000Z".to_string(),
    };
    assert_eq!(recv_routed(&mut bob).await, expected);
    assert_eq!(recv_routed(&mut carol).await, expected);
    assert_no_routed(&mut alice).await;
}

#[tokio::test]
async fn anonymous_connection_gets_nothing_and_sends_nothing() {
    let addr = start_relay().await;

    let mut alice = login(addr, "alice", &["alice"]).await;
    let mut lurker = connect(addr).await;

    send_raw(&mut lurker, r#"{"type":"chat","from":"mallory","message":"spam"}"#).await;
    send_raw(&mut alice, r#"{"type":"chat","message":"hi"}"#).await;

    assert_no_routed(&mut alice).await;
    let quiet = tokio::time::timeout(QUIET_PERIOD, recv(&mut lurker)).await;
    assert!(quiet.is_err(), "anonymous connection received {quiet:?}");
}

#[tokio::test]
async fn disconnect_rebroadcasts_presence() {
    let addr = start_relay().await;

    let mut alice = login(addr, "alice", &["alice"]).await;
    let mut bob = login(addr, "bob", &["alice", "bob"]).await;
    wait_for_users(&mut alice, &["alice", "bob"]).await;

    bob.close(None).await.unwrap();
    wait_for_users(&mut alice, &["alice"]).await;
}

#[tokio::test]
async fn dropped_socket_rebroadcasts_presence() {
    let addr = start_relay().await;

    let mut alice = login(addr, "alice", &["alice"]).await;
    let bob = login(addr, "bob", &["alice", "bob"]).await;
    wait_for_users(&mut alice, &["alice", "bob"]).await;

    drop(bob);
    wait_for_users(&mut alice, &["alice"]).await;
}

#[tokio::test]
async fn malformed_frames_do_not_close_the_connection() {
    let addr = start_relay().await;

    let mut alice = login(addr, "alice", &["alice"]).await;
    let mut bob = login(addr, "bob", &["alice", "bob"]).await;
    wait_for_users(&mut alice, &["alice", "bob"]).await;

    send_raw(&mut alice, "{this is not json").await;
    send_raw(&mut alice, r#"{"type":"privateChat","message":"no recipient"}"#).await;
    send_raw(&mut alice, "[1,2,3]").await;
    alice
        .send(Message::Binary(vec![0xff, 0xfe, 0x00].into()))
        .await
        .unwrap();
    send(&mut alice, &private_chat("bob", "still alive")).await;

    assert!(matches!(
        recv_routed(&mut bob).await,
        ServerMessage::PrivateChat { message, .. } if message == "still alive"
    ));
}

#[tokio::test]
async fn binary_utf8_frame_is_routed() {
    let addr = start_relay().await;

    let mut alice = login(addr, "alice", &["alice"]).await;
    let mut bob = login(addr, "bob", &["alice", "bob"]).await;
    wait_for_users(&mut alice, &["alice", "bob"]).await;

    let text = codec::encode_client(&private_chat("bob", "as binary")).unwrap();
    alice
        .send(Message::Binary(text.into_bytes().into()))
        .await
        .unwrap();

    assert!(matches!(
        recv_routed(&mut bob).await,
        ServerMessage::PrivateChat { message, .. } if message == "as binary"
    ));
}

#[tokio::test]
async fn unknown_type_is_ignored() {
    let addr = start_relay().await;

    let mut alice = login(addr, "alice", &["alice"]).await;
    let mut bob = login(addr, "bob", &["alice", "bob"]).await;
    wait_for_users(&mut alice, &["alice", "bob"]).await;

    send_raw(&mut alice, r#"{"type":"typing","from":"alice","to":"bob"}"#).await;
    assert_no_routed(&mut bob).await;

    send(&mut alice, &private_chat("bob", "after unknown")).await;
    assert!(matches!(
        recv_routed(&mut bob).await,
        ServerMessage::PrivateChat { message, .. } if message == "after unknown"
    ));
}

#[tokio::test]
async fn duplicate_usernames_all_receive() {
    let addr = start_relay().await;

    let mut alice = login(addr, "alice", &["alice"]).await;
    let mut bob_phone = login(addr, "bob", &["alice", "bob"]).await;
    let mut bob_laptop = login(addr, "bob", &["alice", "bob", "bob"]).await;
    wait_for_users(&mut alice, &["alice", "bob", "bob"]).await;

    send(&mut alice, &private_chat("bob", "to every device")).await;

    for device in [&mut bob_phone, &mut bob_laptop] {
        assert!(matches!(
            recv_routed(device).await,
            ServerMessage::PrivateChat { message, .. } if message == "to every device"
        ));
    }
}

#[tokio::test]
async fn echo_option_returns_one_copy_to_sender() {
    let addr = start_relay_with(RelayOptions {
        echo_private_chat: true,
        ..RelayOptions::default()
    })
    .await;

    let mut alice = login(addr, "alice", &["alice"]).await;
    let mut bob = login(addr, "bob", &["alice", "bob"]).await;
    wait_for_users(&mut alice, &["alice", "bob"]).await;

    send(&mut alice, &private_chat("bob", "echoed")).await;

    assert!(matches!(
        recv_routed(&mut bob).await,
        ServerMessage::PrivateChat { from, .. } if from == "alice"
    ));
    assert!(matches!(
        recv_routed(&mut alice).await,
        ServerMessage::PrivateChat { to, .. } if to == "bob"
    ));
    assert_no_routed(&mut alice).await;
}
