//! Envelope types exchanged between chat clients and the relay server.
//!
//! Every frame on the wire is one JSON object tagged by its `type` field.
//! [`ClientMessage`] covers what clients send; [`ServerMessage`] covers what
//! the relay sends back. Routing metadata (`type`, `from`, `to`) is the only
//! part the relay reads: `message`, `nonce` and key material are opaque
//! strings carried end to end.

use serde::{Deserialize, Serialize};

/// Messages sent by a client to the relay.
///
/// Unrecognized `type` tags deserialize to [`ClientMessage::Unknown`] so
/// newer clients can talk to an older relay without faulting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Claims a username for this connection, optionally advertising a
    /// public key other users can look up.
    Login {
        /// Username to register under. Not required to be unique.
        username: String,
        /// Public key material, opaque to the relay.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub_key: Option<String>,
    },

    /// Broadcast chat to every other logged-in user.
    Chat {
        /// Sender username. The relay replaces it with the session's
        /// registered username.
        #[serde(default)]
        from: String,
        /// Opaque message body.
        message: String,
        /// ISO-8601 timestamp. The relay fills in the current time if absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// Direct chat to every connection registered under `to`.
    PrivateChat {
        /// Sender username (replaced by the relay).
        #[serde(default)]
        from: String,
        /// Recipient username.
        to: String,
        /// Opaque ciphertext.
        message: String,
        /// Opaque nonce used to produce `message`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nonce: Option<String>,
        /// ISO-8601 timestamp, passed through untouched.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// Asks the relay for the public key `to` advertised at login.
    KeyExchange {
        /// Requesting username (replaced by the relay).
        #[serde(default)]
        from: String,
        /// User whose key is wanted.
        to: String,
    },

    /// Hands a public key to `to`, completing a client-driven exchange.
    KeyExchangeResponse {
        /// Responding username (replaced by the relay).
        #[serde(default)]
        from: String,
        /// User the key is meant for.
        to: String,
        /// Opaque public key material.
        pub_key: String,
    },

    /// Looks up `to`'s public key; the answer goes back to `from`.
    PublicKeyRequest {
        /// Requesting username (replaced by the relay).
        #[serde(default)]
        from: String,
        /// User whose key is wanted.
        to: String,
    },

    /// Any `type` this relay does not understand.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Wire name of this message's `type` tag, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Chat { .. } => "chat",
            Self::PrivateChat { .. } => "privateChat",
            Self::KeyExchange { .. } => "keyExchange",
            Self::KeyExchangeResponse { .. } => "keyExchangeResponse",
            Self::PublicKeyRequest { .. } => "publicKeyRequest",
            Self::Unknown => "unknown",
        }
    }
}

/// Messages sent by the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// A broadcast chat from another user.
    Chat {
        /// Sender username.
        from: String,
        /// Opaque message body.
        message: String,
        /// ISO-8601 timestamp (sender-supplied or relay-generated).
        timestamp: String,
    },

    /// A direct chat addressed to this user.
    PrivateChat {
        /// Sender username.
        from: String,
        /// Recipient username.
        to: String,
        /// Opaque ciphertext.
        message: String,
        /// Opaque nonce, if the sender supplied one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nonce: Option<String>,
        /// Sender-supplied timestamp, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// A public key, either looked up by the relay or forwarded from a peer.
    KeyExchangeResponse {
        /// User the key belongs to.
        from: String,
        /// User the key is delivered to.
        to: String,
        /// Opaque public key material.
        pub_key: String,
    },

    /// Answer to a [`ClientMessage::PublicKeyRequest`].
    PublicKeyRequestResponse {
        /// User the key belongs to.
        from: String,
        /// Opaque public key material.
        public_key_info: String,
    },

    /// Every username currently logged in, sent whenever membership changes.
    UserList {
        /// Registered usernames; duplicates appear once per connection.
        users: Vec<String>,
    },

    /// A user-visible failure. Only sent for key-exchange misses.
    Error {
        /// Human-readable description.
        message: String,
    },
}

impl ServerMessage {
    /// Builds the error returned when a key exchange names a user with no
    /// stored key.
    #[must_use]
    pub fn key_not_found(username: &str) -> Self {
        Self::Error {
            message: format!("Public key for user {username} not found"),
        }
    }
}
