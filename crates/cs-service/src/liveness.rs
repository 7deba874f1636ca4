//! Heartbeat tracking for the liveness monitor.
//!
//! Clients send periodic heartbeats over their signaling connection; the
//! tracker records the last one per (session, user). The background sweeper
//! queries for expired entries and evicts the zombies it finds.
//!
//! Timestamps use `tokio::time::Instant` so sweeps can be exercised under
//! `tokio::time::pause()` in tests.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Last-seen heartbeat state for one participant.
#[derive(Debug, Clone)]
struct HeartbeatEntry {
    connection_id: String,
    room_id: Option<String>,
    last_seen: Instant,
}

/// A participant whose heartbeat lapsed past the timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredParticipant {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub connection_id: String,
    pub room_id: Option<String>,
}

/// Concurrent map of live heartbeats keyed by (session, user).
#[derive(Debug, Clone, Default)]
pub struct HeartbeatTracker {
    entries: Arc<DashMap<(Uuid, Uuid), HeartbeatEntry>>,
}

impl HeartbeatTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat, resetting the participant's last-seen instant.
    /// A heartbeat from a new connection takes over the entry.
    pub fn record(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        connection_id: &str,
        room_id: Option<&str>,
    ) {
        self.entries.insert(
            (session_id, user_id),
            HeartbeatEntry {
                connection_id: connection_id.to_string(),
                room_id: room_id.map(str::to_string),
                last_seen: Instant::now(),
            },
        );
    }

    /// Drop the entry for (session, user), regardless of connection.
    pub fn remove(&self, session_id: Uuid, user_id: Uuid) {
        self.entries.remove(&(session_id, user_id));
    }

    /// Drop every entry for `session_id`. Called when the session reaches
    /// a terminal state; there is nothing left to evict from it.
    pub fn remove_session(&self, session_id: Uuid) {
        self.entries.retain(|(entry_session, _), _| *entry_session != session_id);
    }

    /// Participants whose last heartbeat is older than `timeout`.
    pub fn expired(&self, timeout: Duration) -> Vec<ExpiredParticipant> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| now.duration_since(entry.value().last_seen) > timeout)
            .map(|entry| {
                let ((session_id, user_id), state) = (entry.key(), entry.value());
                ExpiredParticipant {
                    session_id: *session_id,
                    user_id: *user_id,
                    connection_id: state.connection_id.clone(),
                    room_id: state.room_id.clone(),
                }
            })
            .collect()
    }

    /// Number of tracked participants.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
