//! Shared wire protocol definitions for the `SealChat` relay.

pub mod codec;
pub mod envelope;
