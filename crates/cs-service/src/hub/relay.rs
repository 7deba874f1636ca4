//! Signaling relay.
//!
//! Delivers offer/answer/ICE frames between peers. Delivery prefers the
//! target's registered connection; when the target is unbound (mid-reconnect)
//! the frame falls back to a room broadcast so the target can pick it up on
//! its next connection. Offer and answer failures are surfaced to the sender;
//! ICE candidate failures are swallowed, candidates are redundant and
//! trickled continuously.

use crate::errors::CsError;
use crate::hub::protocol::ServerMessage;
use crate::observability::metrics::record_relay;
use crate::registry::{ConnectionRegistry, RoomMembership};
use uuid::Uuid;

/// What kind of frame is being relayed; controls failure handling and
/// metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Offer,
    Answer,
    IceCandidate,
    KeyExchange,
    Notification,
}

impl RelayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayKind::Offer => "offer",
            RelayKind::Answer => "answer",
            RelayKind::IceCandidate => "ice_candidate",
            RelayKind::KeyExchange => "key_exchange",
            RelayKind::Notification => "notification",
        }
    }

    /// Whether a direct-delivery failure is reported back to the sender.
    fn surfaces_failure(&self) -> bool {
        matches!(self, RelayKind::Offer | RelayKind::Answer)
    }
}

/// Stateless relay over the registry and room membership.
#[derive(Debug, Clone)]
pub struct SignalingRelay {
    registry: ConnectionRegistry,
    rooms: RoomMembership,
}

impl SignalingRelay {
    pub fn new(registry: ConnectionRegistry, rooms: RoomMembership) -> Self {
        Self { registry, rooms }
    }

    /// Relay an SDP offer to `target_user_id`.
    pub async fn send_offer(
        &self,
        room_id: &str,
        sender_user_id: Uuid,
        target_user_id: Uuid,
        sdp: String,
    ) -> Result<(), CsError> {
        let message = ServerMessage::ReceiveOffer {
            room_id: room_id.to_string(),
            sender_user_id,
            sdp,
        };
        self.deliver(RelayKind::Offer, room_id, sender_user_id, target_user_id, message)
            .await
    }

    /// Relay an SDP answer to `target_user_id`.
    pub async fn send_answer(
        &self,
        room_id: &str,
        sender_user_id: Uuid,
        target_user_id: Uuid,
        sdp: String,
    ) -> Result<(), CsError> {
        let message = ServerMessage::ReceiveAnswer {
            room_id: room_id.to_string(),
            sender_user_id,
            sdp,
        };
        self.deliver(RelayKind::Answer, room_id, sender_user_id, target_user_id, message)
            .await
    }

    /// Relay an ICE candidate to `target_user_id`. Never fails the sender.
    pub async fn send_ice_candidate(
        &self,
        room_id: &str,
        sender_user_id: Uuid,
        target_user_id: Uuid,
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u32>,
    ) {
        let message = ServerMessage::ReceiveIceCandidate {
            room_id: room_id.to_string(),
            sender_user_id,
            candidate,
            sdp_mid,
            sdp_m_line_index,
        };
        // Errors already swallowed for ICE by deliver()
        let _ = self
            .deliver(
                RelayKind::IceCandidate,
                room_id,
                sender_user_id,
                target_user_id,
                message,
            )
            .await;
    }

    /// Relay a key-exchange frame to a specific target, with room fallback.
    pub async fn send_key_exchange(
        &self,
        room_id: Option<&str>,
        sender_user_id: Uuid,
        target_user_id: Option<Uuid>,
        message: ServerMessage,
    ) -> Result<(), CsError> {
        match (target_user_id, room_id) {
            (Some(target), _) => {
                let room = room_id.unwrap_or("");
                self.deliver(RelayKind::KeyExchange, room, sender_user_id, target, message)
                    .await
            }
            (None, Some(room)) => {
                self.broadcast(room, Some(sender_user_id), message).await;
                record_relay(RelayKind::KeyExchange.as_str(), "broadcast", "ok");
                Ok(())
            }
            (None, None) => Err(CsError::BadRequest(
                "Key-exchange message needs a target or a room".to_string(),
            )),
        }
    }

    /// Deliver to the target's registered connection, falling back to a room
    /// broadcast when the target is unbound.
    async fn deliver(
        &self,
        kind: RelayKind,
        room_id: &str,
        sender_user_id: Uuid,
        target_user_id: Uuid,
        message: ServerMessage,
    ) -> Result<(), CsError> {
        if let Some(handle) = self.registry.lookup(target_user_id) {
            match handle.send(message).await {
                Ok(()) => {
                    record_relay(kind.as_str(), "direct", "ok");
                    return Ok(());
                }
                Err(failed) => {
                    record_relay(kind.as_str(), "direct", "error");
                    tracing::warn!(
                        target: "cs.relay",
                        kind = kind.as_str(),
                        target_user_id = %target_user_id,
                        connection_id = %failed.connection_id,
                        "Direct delivery failed"
                    );
                    if kind.surfaces_failure() {
                        return Err(CsError::RelayFailed(format!(
                            "delivery to {} failed",
                            target_user_id
                        )));
                    }
                    return Ok(());
                }
            }
        }

        // Target unbound; fall back to the room so a reconnecting peer can
        // still catch the frame.
        tracing::debug!(
            target: "cs.relay",
            kind = kind.as_str(),
            room_id = %room_id,
            target_user_id = %target_user_id,
            "Target unbound, falling back to room broadcast"
        );
        let delivered = self.broadcast(room_id, Some(sender_user_id), message).await;
        record_relay(kind.as_str(), "broadcast", "ok");

        if delivered == 0 && kind.surfaces_failure() {
            return Err(CsError::RelayFailed(format!(
                "no reachable peers in room {}",
                room_id
            )));
        }
        Ok(())
    }

    /// Broadcast a frame to every member of `room_id` except `exclude`.
    /// Per-member failures are logged and skipped. Returns the number of
    /// members the frame was queued for.
    pub async fn broadcast(
        &self,
        room_id: &str,
        exclude: Option<Uuid>,
        message: ServerMessage,
    ) -> usize {
        let mut delivered = 0;
        for member in self.rooms.members(room_id) {
            if Some(member) == exclude {
                continue;
            }
            let Some(handle) = self.registry.lookup(member) else {
                continue;
            };
            match handle.send(message.clone()).await {
                Ok(()) => delivered += 1,
                Err(failed) => {
                    tracing::debug!(
                        target: "cs.relay",
                        room_id = %room_id,
                        user_id = %member,
                        connection_id = %failed.connection_id,
                        "Broadcast delivery to member failed"
                    );
                }
            }
        }
        delivered
    }
}
