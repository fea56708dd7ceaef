//! Message router: decides what happens to each inbound envelope.
//!
//! The router reads only routing metadata (`type`, `from`, `to`). Message
//! bodies, nonces and key material are copied into the outbound envelope
//! untouched.
//!
//! | type                  | delivered to                                   |
//! |-----------------------|------------------------------------------------|
//! | `login`               | everyone (new user list)                       |
//! | `chat`                | every other logged-in connection               |
//! | `privateChat`         | every connection registered as `to`            |
//! | `keyExchange`         | the sender (key, or an error if none stored)   |
//! | `keyExchangeResponse` | every connection registered as `to`            |
//! | `publicKeyRequest`    | the requester's connections, if a key exists   |
//!
//! Bad frames are logged and dropped; they never close the connection.

use axum::extract::ws::Message;
use sealchat_proto::codec;
use sealchat_proto::envelope::{ClientMessage, ServerMessage};

use crate::connection::{ConnectionHandle, encode_frame};
use crate::relay::RelayState;
use crate::session::Session;

/// Decodes one inbound frame and dispatches it.
pub fn handle_frame(relay: &RelayState, session: &mut Session, frame: &[u8]) {
    let max = relay.options().max_frame_size;
    if frame.len() > max {
        tracing::warn!(
            conn = %session.id(),
            size = frame.len(),
            max,
            "frame exceeds size limit, dropping"
        );
        return;
    }

    match codec::decode_client_bytes(frame) {
        Ok(msg) => dispatch(relay, session, msg),
        Err(e) => {
            tracing::warn!(conn = %session.id(), error = %e, "failed to decode frame");
        }
    }
}

/// Routes one decoded envelope from `session`.
///
/// Envelopes from a session that is already closed or errored are dropped.
pub fn dispatch(relay: &RelayState, session: &mut Session, msg: ClientMessage) {
    if session.state().is_terminal() {
        tracing::debug!(
            conn = %session.id(),
            kind = msg.kind(),
            "dropping frame from closed connection"
        );
        return;
    }
    match msg {
        ClientMessage::Login { username, pub_key } => login(relay, session, username, pub_key),
        ClientMessage::Unknown => {
            tracing::trace!(conn = %session.id(), "ignoring frame with unrecognized type");
        }
        routed => route(relay, session, routed),
    }
}

fn login(relay: &RelayState, session: &mut Session, username: String, pub_key: Option<String>) {
    if username.is_empty() {
        tracing::warn!(conn = %session.id(), "received login with empty username");
        return;
    }
    if let Some(previous) = session.username()
        && previous != username
    {
        tracing::info!(
            conn = %session.id(),
            previous = %previous,
            username = %username,
            "connection logged in again under a new name"
        );
    }

    let has_key = pub_key.is_some();
    let online = relay.login(session.handle(), &username, pub_key);
    tracing::info!(
        conn = %session.id(),
        username = %username,
        has_key,
        online,
        "user logged in"
    );
    session.set_username(username);
}

/// Handles every type that requires a logged-in sender.
fn route(relay: &RelayState, session: &Session, msg: ClientMessage) {
    let Some(sender) = session.username() else {
        tracing::debug!(
            conn = %session.id(),
            kind = msg.kind(),
            "dropping frame from connection that has not logged in"
        );
        return;
    };

    match msg {
        ClientMessage::Chat {
            from,
            message,
            timestamp,
        } => {
            check_sender(session, sender, &from);
            chat(relay, session, sender, message, timestamp);
        }
        ClientMessage::PrivateChat {
            from,
            to,
            message,
            nonce,
            timestamp,
        } => {
            check_sender(session, sender, &from);
            let outbound = ServerMessage::PrivateChat {
                from: sender.to_string(),
                to: to.clone(),
                message,
                nonce,
                timestamp,
            };
            private_chat(relay, session, &to, &outbound);
        }
        ClientMessage::KeyExchange { from, to } => {
            check_sender(session, sender, &from);
            key_exchange(relay, session, sender, to);
        }
        ClientMessage::KeyExchangeResponse { from, to, pub_key } => {
            check_sender(session, sender, &from);
            let outbound = ServerMessage::KeyExchangeResponse {
                from: sender.to_string(),
                to: to.clone(),
                pub_key,
            };
            forward_to_user(relay, session, &to, &outbound);
        }
        ClientMessage::PublicKeyRequest { from, to } => {
            check_sender(session, sender, &from);
            public_key_request(relay, session, sender, &to);
        }
        ClientMessage::Login { .. } | ClientMessage::Unknown => {}
    }
}

/// The registered username is authoritative for `from`; a mismatching claim
/// is overridden.
fn check_sender(session: &Session, sender: &str, claimed: &str) {
    if !claimed.is_empty() && claimed != sender {
        tracing::debug!(
            conn = %session.id(),
            claimed = %claimed,
            sender = %sender,
            "overriding spoofed sender"
        );
    }
}

fn chat(
    relay: &RelayState,
    session: &Session,
    sender: &str,
    message: String,
    timestamp: Option<String>,
) {
    let outbound = ServerMessage::Chat {
        from: sender.to_string(),
        message,
        timestamp: timestamp.unwrap_or_else(now_timestamp),
    };
    let Some(frame) = encode_frame(&outbound) else {
        return;
    };

    let directory = relay.directory();
    let others = directory
        .registry
        .connections()
        .filter(|handle| handle.id() != session.id());
    let (_, delivered) = fan_out(others, &frame);
    drop(directory);

    tracing::debug!(conn = %session.id(), delivered, "chat broadcast");
}

fn private_chat(relay: &RelayState, session: &Session, to: &str, outbound: &ServerMessage) {
    let Some(frame) = encode_frame(outbound) else {
        return;
    };

    let directory = relay.directory();
    let sender_is_recipient = directory
        .registry
        .find_connections(to)
        .any(|handle| handle.id() == session.id());
    let (matched, delivered) = fan_out(directory.registry.find_connections(to), &frame);
    drop(directory);

    if matched == 0 {
        tracing::debug!(conn = %session.id(), to = %to, "private chat recipient not online");
        return;
    }
    if relay.options().echo_private_chat && !sender_is_recipient {
        session.handle().send_frame(frame);
    }
    tracing::debug!(conn = %session.id(), to = %to, delivered, "private chat routed");
}

fn key_exchange(relay: &RelayState, session: &Session, sender: &str, to: String) {
    let stored = relay.directory().keys.get_key(&to).map(str::to_owned);
    let reply = if let Some(pub_key) = stored {
        tracing::debug!(conn = %session.id(), to = %to, "key exchange answered from store");
        ServerMessage::KeyExchangeResponse {
            from: to,
            to: sender.to_string(),
            pub_key,
        }
    } else {
        tracing::debug!(conn = %session.id(), to = %to, "key exchange for user without key");
        ServerMessage::key_not_found(&to)
    };
    session.handle().send(&reply);
}

fn forward_to_user(relay: &RelayState, session: &Session, to: &str, outbound: &ServerMessage) {
    let Some(frame) = encode_frame(outbound) else {
        return;
    };

    let directory = relay.directory();
    let (matched, delivered) = fan_out(directory.registry.find_connections(to), &frame);
    drop(directory);

    if matched == 0 {
        tracing::debug!(conn = %session.id(), to = %to, "key response recipient not online");
    } else {
        tracing::debug!(conn = %session.id(), to = %to, delivered, "key response forwarded");
    }
}

fn public_key_request(relay: &RelayState, session: &Session, sender: &str, to: &str) {
    let directory = relay.directory();
    let Some(key) = directory.keys.get_key(to) else {
        tracing::debug!(conn = %session.id(), to = %to, "public key request for user without key");
        return;
    };
    let Some(frame) = encode_frame(&ServerMessage::PublicKeyRequestResponse {
        from: to.to_string(),
        public_key_info: key.to_string(),
    }) else {
        return;
    };

    let (matched, delivered) = fan_out(directory.registry.find_connections(sender), &frame);
    drop(directory);

    tracing::debug!(
        conn = %session.id(),
        to = %to,
        matched,
        delivered,
        "public key request answered"
    );
}

/// Queues `frame` for every target. Returns `(targets, queued)`.
fn fan_out<'a>(
    targets: impl Iterator<Item = &'a ConnectionHandle>,
    frame: &Message,
) -> (usize, usize) {
    let mut matched = 0;
    let mut delivered = 0;
    for handle in targets {
        matched += 1;
        if handle.send_frame(frame.clone()) {
            delivered += 1;
        }
    }
    (matched, delivered)
}

/// Current UTC time as ISO-8601 with millisecond precision.
fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
