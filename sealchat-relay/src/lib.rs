//! `SealChat` Relay Server library.
//!
//! Exposes the relay server for use in tests and embedding.
//! The relay server accepts WebSocket connections, tracks which username
//! each connection logged in as, and routes JSON envelopes between them
//! without ever reading message bodies or key material.

pub mod config;
pub mod connection;
pub mod keys;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod router;
pub mod session;
