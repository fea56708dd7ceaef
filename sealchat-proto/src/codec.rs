//! JSON encoding and decoding for SealChat envelopes.
//!
//! Each transport frame carries exactly one UTF-8 JSON object. Unknown
//! fields are ignored on decode; unknown `type` tags decode to
//! [`ClientMessage::Unknown`] instead of failing.

use crate::envelope::{ClientMessage, ServerMessage};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame is not a well-formed envelope.
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    /// A binary frame did not contain UTF-8 text.
    #[error("frame is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
}

/// Decodes a client envelope from a text frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if the text is not a JSON object with a
/// `type` tag, or if a known type is missing a required field.
pub fn decode_client(text: &str) -> Result<ClientMessage, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Decodes a client envelope from a binary frame holding UTF-8 JSON.
///
/// # Errors
///
/// Returns [`CodecError::NotUtf8`] for non-UTF-8 bytes, otherwise the same
/// errors as [`decode_client`].
pub fn decode_client_bytes(bytes: &[u8]) -> Result<ClientMessage, CodecError> {
    decode_client(std::str::from_utf8(bytes)?)
}

/// Encodes a client envelope to JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode_client(msg: &ClientMessage) -> Result<String, CodecError> {
    Ok(serde_json::to_string(msg)?)
}

/// Decodes a server envelope from a text frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if the text is not a known server envelope.
pub fn decode_server(text: &str) -> Result<ServerMessage, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Encodes a server envelope to JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if serialization fails.
pub fn encode_server(msg: &ServerMessage) -> Result<String, CodecError> {
    Ok(serde_json::to_string(msg)?)
}
