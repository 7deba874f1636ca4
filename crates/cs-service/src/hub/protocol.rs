//! WebSocket message envelopes.
//!
//! All frames are JSON objects tagged by a `type` field. Inbound frames that
//! do not match a known shape are rejected with a `BAD_MESSAGE` error frame;
//! the connection stays open.

use crate::models::E2eeMessageType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frames accepted from clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Enter a signaling room. A connection is in at most one room at a time;
    /// joining a second room implicitly leaves the first.
    JoinRoom { room_id: String },

    /// Relay an SDP offer to a specific peer.
    SendOffer {
        room_id: String,
        target_user_id: Uuid,
        sdp: String,
    },

    /// Relay an SDP answer to a specific peer.
    SendAnswer {
        room_id: String,
        target_user_id: Uuid,
        sdp: String,
    },

    /// Relay an ICE candidate to a specific peer. Best-effort.
    SendIceCandidate {
        room_id: String,
        target_user_id: Uuid,
        candidate: String,
        #[serde(default)]
        sdp_mid: Option<String>,
        #[serde(default)]
        sdp_m_line_index: Option<u32>,
    },

    /// Liveness heartbeat for a session the sender participates in.
    SendHeartbeat { session_id: Uuid },

    /// Toggle the sender's camera. Broadcast to the room; persisted when a
    /// session is named.
    ToggleCamera {
        room_id: String,
        enabled: bool,
        #[serde(default)]
        session_id: Option<Uuid>,
    },

    /// Toggle the sender's microphone.
    ToggleMicrophone {
        room_id: String,
        enabled: bool,
        #[serde(default)]
        session_id: Option<Uuid>,
    },

    /// Toggle the sender's screen share.
    ToggleScreenShare {
        room_id: String,
        enabled: bool,
        #[serde(default)]
        session_id: Option<Uuid>,
    },

    /// In-call text message, broadcast to the room.
    Chat { room_id: String, content: String },

    /// End-to-end encryption key-exchange message. Validated and audited
    /// before relay; the payload is opaque to the service.
    E2ee {
        message_type: E2eeMessageType,
        #[serde(default)]
        target_user_id: Option<Uuid>,
        #[serde(default)]
        room_id: Option<String>,
        encrypted_payload: String,
        #[serde(default)]
        key_fingerprint: Option<String>,
        #[serde(default)]
        key_generation: Option<i32>,
        #[serde(default)]
        session_id: Option<Uuid>,
        #[serde(default)]
        client_timestamp: Option<DateTime<Utc>>,
    },
}

/// Frames sent to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Ack for a room join; lists the peers already present.
    RoomJoined {
        room_id: String,
        participants: Vec<Uuid>,
        heartbeat_interval_seconds: u64,
    },

    /// A peer entered the room.
    UserJoined { room_id: String, user_id: Uuid },

    /// A peer left the room. `reason` is "left", "disconnected" or "evicted".
    UserLeft {
        room_id: String,
        user_id: Uuid,
        reason: &'static str,
    },

    /// SDP offer relayed from a peer.
    ReceiveOffer {
        room_id: String,
        sender_user_id: Uuid,
        sdp: String,
    },

    /// SDP answer relayed from a peer.
    ReceiveAnswer {
        room_id: String,
        sender_user_id: Uuid,
        sdp: String,
    },

    /// ICE candidate relayed from a peer.
    ReceiveIceCandidate {
        room_id: String,
        sender_user_id: Uuid,
        candidate: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sdp_mid: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sdp_m_line_index: Option<u32>,
    },

    /// Heartbeat acknowledgement.
    HeartbeatAck { server_timestamp: DateTime<Utc> },

    /// A peer toggled their camera.
    CameraToggled {
        room_id: String,
        user_id: Uuid,
        enabled: bool,
    },

    /// A peer toggled their microphone.
    MicrophoneToggled {
        room_id: String,
        user_id: Uuid,
        enabled: bool,
    },

    /// A peer toggled their screen share.
    ScreenShareToggled {
        room_id: String,
        user_id: Uuid,
        enabled: bool,
    },

    /// In-call text message from a peer.
    Chat {
        room_id: String,
        sender_user_id: Uuid,
        content: String,
        sent_at: DateTime<Utc>,
    },

    /// Outcome of the sender's own key-exchange message.
    E2eeResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },

    /// Key-exchange message relayed from a peer.
    E2eeMessage {
        message_type: E2eeMessageType,
        sender_user_id: Uuid,
        encrypted_payload: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        key_fingerprint: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        key_generation: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },

    /// Error frame. The connection stays open unless the transport itself
    /// failed.
    Error { code: String, message: String },
}

/// Reason strings for `UserLeft` frames.
pub mod leave_reason {
    pub const LEFT: &str = "left";
    pub const DISCONNECTED: &str = "disconnected";
    pub const EVICTED: &str = "evicted";
}
