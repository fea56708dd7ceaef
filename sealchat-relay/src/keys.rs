//! Public-key store: the key material each user advertised at login.
//!
//! Keys are opaque strings. The relay only hands them back out in answer to
//! key-exchange and public-key lookups; it never parses or uses them.

use std::collections::HashMap;

/// Mapping from username to advertised public key. Last writer wins.
#[derive(Debug, Default)]
pub struct PublicKeyStore {
    keys: HashMap<String, String>,
}

impl PublicKeyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `key` for `username`, returning the key it replaced.
    pub fn set_key(&mut self, username: &str, key: String) -> Option<String> {
        self.keys.insert(username.to_string(), key)
    }

    /// Returns the key stored for `username`.
    #[must_use]
    pub fn get_key(&self, username: &str) -> Option<&str> {
        self.keys.get(username).map(String::as_str)
    }

    /// Removes and returns the key stored for `username`.
    pub fn remove_key(&mut self, username: &str) -> Option<String> {
        self.keys.remove(username)
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
