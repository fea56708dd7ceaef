//! Presence broadcaster.
//!
//! Pushes the full list of logged-in usernames to every registered
//! connection. Called in-line after each login and each disconnect cleanup,
//! while the caller still holds the directory lock, so every client sees
//! membership changes in the order they happened.

use sealchat_proto::envelope::ServerMessage;

use crate::connection::encode_frame;
use crate::registry::ConnectionRegistry;

/// Sends a `userList` envelope reflecting `registry` to all of its
/// connections.
///
/// Returns how many connections the frame was queued for. A connection that
/// is closing or backed up is skipped without affecting the others.
pub fn broadcast(registry: &ConnectionRegistry) -> usize {
    let users = registry.list_usernames();
    let online = users.len();
    let Some(frame) = encode_frame(&ServerMessage::UserList { users }) else {
        return 0;
    };

    let mut delivered = 0;
    for handle in registry.connections() {
        if handle.send_frame(frame.clone()) {
            delivered += 1;
        }
    }

    tracing::debug!(online, delivered, "broadcast user list");
    delivered
}
