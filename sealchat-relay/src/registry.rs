//! Connection registry: which live connection is logged in as which user.
//!
//! The registry is the single source of truth for presence. It maps each
//! logged-in connection to the username it claimed, and answers the reverse
//! question (which connections are `alice`?) for point-to-point delivery.
//!
//! Usernames are not unique: two connections may log in under the same name
//! (for example one user on two devices), so reverse lookups always yield
//! every match.
//!
//! The registry itself is a plain data structure. [`crate::relay::RelayState`]
//! serializes all access to it behind one lock together with the
//! [`crate::keys::PublicKeyStore`].

use std::collections::BTreeMap;

use crate::connection::{ConnectionHandle, ConnectionId};

#[derive(Debug, Clone)]
struct RegistryEntry {
    username: String,
    handle: ConnectionHandle,
}

/// Mapping from logged-in connection to claimed username.
///
/// Entries iterate in connection accept order.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: BTreeMap<ConnectionId, RegistryEntry>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` under `username`, replacing any username the same
    /// connection registered before.
    ///
    /// Returns the previous username for this connection, if any.
    pub fn register(&mut self, handle: &ConnectionHandle, username: &str) -> Option<String> {
        self.entries
            .insert(
                handle.id(),
                RegistryEntry {
                    username: username.to_string(),
                    handle: handle.clone(),
                },
            )
            .map(|previous| previous.username)
    }

    /// Removes a connection. Removing an absent connection is a no-op.
    ///
    /// Returns the username the connection was registered under, if any.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<String> {
        self.entries.remove(&id).map(|entry| entry.username)
    }

    /// Returns every registered username, one per connection.
    #[must_use]
    pub fn list_usernames(&self) -> Vec<String> {
        self.entries
            .values()
            .map(|entry| entry.username.clone())
            .collect()
    }

    /// Returns every connection registered under `username`.
    pub fn find_connections<'a>(
        &'a self,
        username: &'a str,
    ) -> impl Iterator<Item = &'a ConnectionHandle> + 'a {
        self.entries
            .values()
            .filter(move |entry| entry.username == username)
            .map(|entry| &entry.handle)
    }

    /// Whether any connection is registered under `username`.
    #[must_use]
    pub fn contains_username(&self, username: &str) -> bool {
        self.find_connections(username).next().is_some()
    }

    /// Iterates over every registered connection.
    pub fn connections(&self) -> impl Iterator<Item = &ConnectionHandle> {
        self.entries.values().map(|entry| &entry.handle)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
