//! Connection registry and room membership.
//!
//! The registry binds authenticated users to their live WebSocket connection.
//! Each connection owns an outbound mpsc channel; the registry hands out
//! cheap clones of the sender so other tasks can deliver frames without
//! touching the socket directly.

use crate::hub::protocol::ServerMessage;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Outbound channel capacity per connection. A client that cannot drain
/// this many frames is effectively dead and will fail relay sends.
pub const CONNECTION_CHANNEL_BUFFER: usize = 128;

/// Handle to a live connection's outbound channel.
///
/// Cloning is cheap; all clones feed the same writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    connection_id: String,
    sender: mpsc::Sender<ServerMessage>,
}

impl ConnectionHandle {
    pub fn new(connection_id: String, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            connection_id,
            sender,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Queue a frame for delivery. Fails when the connection's writer task
    /// has shut down.
    pub async fn send(&self, message: ServerMessage) -> Result<(), SendFailed> {
        self.sender.send(message).await.map_err(|_| SendFailed {
            connection_id: self.connection_id.clone(),
        })
    }
}

/// Delivery to a connection's outbound channel failed.
#[derive(Debug)]
pub struct SendFailed {
    pub connection_id: String,
}

/// Maps each user to their single live connection.
///
/// A user has at most one binding; a new connection for the same user
/// replaces the old one. Unbinding is guarded by connection identity so a
/// stale connection's teardown can never evict its successor.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<DashMap<Uuid, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user_id` to `handle`, returning the handle it replaced, if any.
    pub fn bind(&self, user_id: Uuid, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.inner.insert(user_id, handle)
    }

    /// Remove the binding for `user_id`, but only if it still points at
    /// `connection_id`. Returns whether a binding was removed.
    pub fn unbind(&self, user_id: Uuid, connection_id: &str) -> bool {
        self.inner
            .remove_if(&user_id, |_, handle| {
                handle.connection_id() == connection_id
            })
            .is_some()
    }

    /// Current connection handle for `user_id`, if bound.
    pub fn lookup(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.inner.get(&user_id).map(|entry| entry.value().clone())
    }

    /// Number of live bindings.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Tracks which users are in which signaling room.
///
/// Membership is independent of the registry: a user can be a room member
/// while briefly unbound during a reconnect. Empty rooms are removed.
#[derive(Debug, Clone, Default)]
pub struct RoomMembership {
    rooms: Arc<DashMap<String, Vec<Uuid>>>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `user_id` to `room_id`, returning the peers that were already
    /// present. Idempotent for a user already in the room.
    pub fn join(&self, room_id: &str, user_id: Uuid) -> Vec<Uuid> {
        let mut members = self.rooms.entry(room_id.to_string()).or_default();
        let peers: Vec<Uuid> = members.iter().copied().filter(|m| *m != user_id).collect();
        if !members.contains(&user_id) {
            members.push(user_id);
        }
        peers
    }

    /// Remove `user_id` from `room_id`. Returns whether the user was a
    /// member. The room itself is dropped once empty.
    pub fn leave(&self, room_id: &str, user_id: Uuid) -> bool {
        let mut removed = false;
        if let Some(mut members) = self.rooms.get_mut(room_id) {
            let before = members.len();
            members.retain(|m| *m != user_id);
            removed = members.len() != before;
        }
        self.rooms
            .remove_if(room_id, |_, members| members.is_empty());
        removed
    }

    /// Snapshot of the members of `room_id`.
    pub fn members(&self, room_id: &str) -> Vec<Uuid> {
        self.rooms
            .get(room_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Snapshot of the members of `room_id` excluding `user_id`.
    pub fn other_members(&self, room_id: &str, user_id: Uuid) -> Vec<Uuid> {
        self.rooms
            .get(room_id)
            .map(|entry| {
                entry
                    .value()
                    .iter()
                    .copied()
                    .filter(|m| *m != user_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `user_id` is currently a member of `room_id`.
    pub fn is_member(&self, room_id: &str, user_id: Uuid) -> bool {
        self.rooms
            .get(room_id)
            .map(|entry| entry.value().contains(&user_id))
            .unwrap_or(false)
    }

    /// Number of rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn handle(connection_id: &str) -> (ConnectionHandle, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        (ConnectionHandle::new(connection_id.to_string(), tx), rx)
    }

    #[test]
    fn test_bind_and_lookup() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (h, _rx) = handle("conn-1");

        assert!(registry.lookup(user).is_none());
        assert!(registry.bind(user, h).is_none());

        let found = registry.lookup(user).unwrap();
        assert_eq!(found.connection_id(), "conn-1");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_rebind_returns_replaced_handle() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (h1, _rx1) = handle("conn-1");
        let (h2, _rx2) = handle("conn-2");

        registry.bind(user, h1);
        let replaced = registry.bind(user, h2).unwrap();

        assert_eq!(replaced.connection_id(), "conn-1");
        assert_eq!(registry.lookup(user).unwrap().connection_id(), "conn-2");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stale_unbind_does_not_evict_successor() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (h1, _rx1) = handle("conn-1");
        let (h2, _rx2) = handle("conn-2");

        registry.bind(user, h1);
        registry.bind(user, h2);

        // The old connection tears down late; its unbind must be a no-op.
        assert!(!registry.unbind(user, "conn-1"));
        assert_eq!(registry.lookup(user).unwrap().connection_id(), "conn-2");

        // The current connection unbinds fine.
        assert!(registry.unbind(user, "conn-2"));
        assert!(registry.lookup(user).is_none());
    }

    #[tokio::test]
    async fn test_handle_send_delivers() {
        let user = Uuid::new_v4();
        let registry = ConnectionRegistry::new();
        let (h, mut rx) = handle("conn-1");
        registry.bind(user, h);

        let sender = registry.lookup(user).unwrap();
        sender
            .send(ServerMessage::HeartbeatAck {
                server_timestamp: chrono::Utc::now(),
            })
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await,
            Some(ServerMessage::HeartbeatAck { .. })
        ));
    }

    #[tokio::test]
    async fn test_handle_send_fails_when_receiver_dropped() {
        let (h, rx) = handle("conn-1");
        drop(rx);

        let result = h
            .send(ServerMessage::HeartbeatAck {
                server_timestamp: chrono::Utc::now(),
            })
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_room_join_returns_existing_peers() {
        let rooms = RoomMembership::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        assert!(rooms.join("room-1", alice).is_empty());

        let peers = rooms.join("room-1", bob);
        assert_eq!(peers, vec![alice]);
        assert_eq!(rooms.members("room-1").len(), 2);
    }

    #[test]
    fn test_room_join_is_idempotent() {
        let rooms = RoomMembership::new();
        let alice = Uuid::new_v4();

        rooms.join("room-1", alice);
        rooms.join("room-1", alice);

        assert_eq!(rooms.members("room-1"), vec![alice]);
    }

    #[test]
    fn test_room_leave_drops_empty_room() {
        let rooms = RoomMembership::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        rooms.join("room-1", alice);
        rooms.join("room-1", bob);

        assert!(rooms.leave("room-1", alice));
        assert_eq!(rooms.room_count(), 1);

        assert!(rooms.leave("room-1", bob));
        assert_eq!(rooms.room_count(), 0);

        // Leaving again is a no-op
        assert!(!rooms.leave("room-1", bob));
    }

    #[test]
    fn test_other_members_excludes_self() {
        let rooms = RoomMembership::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        rooms.join("room-1", alice);
        rooms.join("room-1", bob);

        assert_eq!(rooms.other_members("room-1", alice), vec![bob]);
        assert!(rooms.is_member("room-1", alice));
        assert!(!rooms.is_member("room-2", alice));
    }
}
