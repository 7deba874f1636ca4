//! Call Signaling Service models.
//!
//! Contains data types used across the Call Signaling Service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Call session status enumeration.
///
/// Represents the lifecycle state of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Session is created but the call has not started.
    Pending,

    /// Call is currently in progress.
    Active,

    /// Call ended normally.
    Completed,

    /// Session was cancelled before the call started.
    Cancelled,
}

impl CallStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Pending => "pending",
            CallStatus::Active => "active",
            CallStatus::Completed => "completed",
            CallStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a status from its database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CallStatus::Pending),
            "active" => Some(CallStatus::Active),
            "completed" => Some(CallStatus::Completed),
            "cancelled" => Some(CallStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether this status is terminal. Terminal sessions never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Cancelled)
    }

    /// Whether a transition from `self` to `next` is legal.
    ///
    /// Legal transitions:
    /// - Pending -> Active (call started)
    /// - Pending -> Completed (ended before anyone connected)
    /// - Pending -> Cancelled
    /// - Active -> Completed
    /// - Active -> Cancelled
    pub fn can_transition_to(&self, next: CallStatus) -> bool {
        match (self, next) {
            (CallStatus::Pending, CallStatus::Active)
            | (CallStatus::Pending, CallStatus::Completed)
            | (CallStatus::Pending, CallStatus::Cancelled)
            | (CallStatus::Active, CallStatus::Completed)
            | (CallStatus::Active, CallStatus::Cancelled) => true,
            _ => false,
        }
    }
}

/// End-to-end encryption key-exchange message type.
///
/// Every key-exchange message relayed through the service carries one of
/// these types; each type is rate-limited independently per sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum E2eeMessageType {
    /// Initial key material offered to a peer.
    KeyOffer,

    /// Response to a key offer.
    KeyAnswer,

    /// Periodic or membership-driven key rotation.
    KeyRotation,

    /// Confirmation that a key was installed.
    KeyConfirmation,

    /// Rejection of offered key material.
    KeyRejection,
}

impl E2eeMessageType {
    /// Returns the string representation used in audit rows and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            E2eeMessageType::KeyOffer => "key_offer",
            E2eeMessageType::KeyAnswer => "key_answer",
            E2eeMessageType::KeyRotation => "key_rotation",
            E2eeMessageType::KeyConfirmation => "key_confirmation",
            E2eeMessageType::KeyRejection => "key_rejection",
        }
    }
}

/// Health check response.
///
/// Returned by the `/health` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service health status ("healthy" or "unhealthy").
    pub status: String,

    /// Database connectivity status (optional, for detailed health).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

// ============================================================================
// Session API Models
// ============================================================================

/// Maximum appointment reference length.
pub const MAX_APPOINTMENT_REF_LENGTH: usize = 128;

/// Maximum room identifier length.
pub const MAX_ROOM_ID_LENGTH: usize = 128;

/// Maximum feedback text length.
pub const MAX_FEEDBACK_LENGTH: usize = 2000;

/// Call session database row.
///
/// Represents a call session as stored in the database.
#[derive(Debug, Clone)]
pub struct CallSessionRow {
    /// Unique session identifier.
    pub session_id: Uuid,

    /// Signaling room the session's participants meet in.
    pub room_id: String,

    /// User who created the session.
    pub initiator_user_id: Uuid,

    /// The invited counterpart.
    pub participant_user_id: Uuid,

    /// External appointment this call belongs to.
    pub appointment_ref: String,

    /// Optional external match/pairing reference.
    pub match_ref: Option<String>,

    /// Optional external conversation thread reference.
    pub thread_ref: Option<String>,

    /// Current session status.
    pub status: CallStatus,

    /// Whether recording was requested for this call.
    pub recording_enabled: bool,

    /// Recording location once available.
    pub recording_url: Option<String>,

    /// Reported call duration in seconds, set at end.
    pub duration_seconds: Option<i32>,

    /// Post-call rating (1-5), set at end.
    pub rating: Option<i16>,

    /// Post-call feedback text, set at end.
    pub feedback: Option<String>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// When the call transitioned to active.
    pub started_at: Option<DateTime<Utc>>,

    /// When the call reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,

    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl CallSessionRow {
    /// Whether `user_id` is one of the two users of record for this session.
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.initiator_user_id == user_id || self.participant_user_id == user_id
    }
}

/// Call participant database row.
///
/// One open row per (session, user); closed rows (left_at set) are retained
/// for history.
#[derive(Debug, Clone)]
pub struct CallParticipantRow {
    /// Unique participant record identifier.
    pub participant_id: Uuid,

    /// Session this participant belongs to.
    pub session_id: Uuid,

    /// The participating user.
    pub user_id: Uuid,

    /// Signaling connection the participant joined with.
    pub connection_id: String,

    /// Whether this participant created the session.
    pub is_initiator: bool,

    /// Camera capability flag.
    pub camera_enabled: bool,

    /// Microphone capability flag.
    pub microphone_enabled: bool,

    /// Screen share capability flag.
    pub screen_share_enabled: bool,

    /// Reported connection quality score (0.0-5.0), if any.
    pub quality_score: Option<f32>,

    /// When the participant joined.
    pub joined_at: DateTime<Utc>,

    /// When the participant left; None while the participant is live.
    pub left_at: Option<DateTime<Utc>>,

    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Device capability flags declared at join time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    #[serde(default = "default_true")]
    pub camera_enabled: bool,

    #[serde(default = "default_true")]
    pub microphone_enabled: bool,

    #[serde(default)]
    pub screen_share_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            camera_enabled: true,
            microphone_enabled: true,
            screen_share_enabled: false,
        }
    }
}

/// Capability mutated by a toggle message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Camera,
    Microphone,
    ScreenShare,
}

impl CapabilityKind {
    /// Column name in `call_participants`. Bounded enum, safe to splice into SQL.
    pub fn column(&self) -> &'static str {
        match self {
            CapabilityKind::Camera => "camera_enabled",
            CapabilityKind::Microphone => "microphone_enabled",
            CapabilityKind::ScreenShare => "screen_share_enabled",
        }
    }
}

/// Request body for `POST /api/v1/sessions`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    /// The invited counterpart.
    pub participant_user_id: Uuid,

    /// External appointment reference. Required; at most one live session
    /// may exist per appointment.
    pub appointment_ref: String,

    /// Room identifier. Generated when omitted.
    pub room_id: Option<String>,

    /// Optional external match/pairing reference.
    pub match_ref: Option<String>,

    /// Optional external conversation thread reference.
    pub thread_ref: Option<String>,

    /// Whether recording is requested.
    #[serde(default)]
    pub recording_enabled: bool,
}

impl CreateSessionRequest {
    /// Validate request fields. Returns a client-facing message on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.appointment_ref.trim().is_empty() {
            return Err("appointment_ref must not be empty".to_string());
        }

        if self.appointment_ref.len() > MAX_APPOINTMENT_REF_LENGTH {
            return Err(format!(
                "appointment_ref must be at most {} characters",
                MAX_APPOINTMENT_REF_LENGTH
            ));
        }

        if let Some(room_id) = &self.room_id {
            if room_id.trim().is_empty() {
                return Err("room_id must not be empty when provided".to_string());
            }
            if room_id.len() > MAX_ROOM_ID_LENGTH {
                return Err(format!(
                    "room_id must be at most {} characters",
                    MAX_ROOM_ID_LENGTH
                ));
            }
        }

        Ok(())
    }
}

/// Request body for `POST /api/v1/sessions/{id}/join`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinSessionRequest {
    /// Connection identifier of the caller's signaling connection, if one
    /// is already open.
    pub connection_id: Option<String>,

    /// Device capability flags. Defaults applied when omitted.
    pub capabilities: Option<DeviceCapabilities>,
}

/// Request body for `POST /api/v1/sessions/{id}/end`.
#[derive(Debug, Clone, Deserialize)]
pub struct EndSessionRequest {
    /// Reported call duration in seconds.
    pub duration_seconds: i32,

    /// Post-call rating (1-5).
    pub rating: Option<i16>,

    /// Post-call feedback text.
    pub feedback: Option<String>,
}

impl EndSessionRequest {
    /// Validate request fields. Returns a client-facing message on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.duration_seconds < 0 {
            return Err("duration_seconds must not be negative".to_string());
        }

        if let Some(rating) = self.rating {
            if !(1..=5).contains(&rating) {
                return Err("rating must be between 1 and 5".to_string());
            }
        }

        if let Some(feedback) = &self.feedback {
            if feedback.len() > MAX_FEEDBACK_LENGTH {
                return Err(format!(
                    "feedback must be at most {} characters",
                    MAX_FEEDBACK_LENGTH
                ));
            }
        }

        Ok(())
    }
}

/// Session representation returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub room_id: String,
    pub initiator_user_id: Uuid,
    pub participant_user_id: Uuid,
    pub appointment_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ref: Option<String>,
    pub status: CallStatus,
    pub recording_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<i16>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<CallSessionRow> for SessionResponse {
    fn from(row: CallSessionRow) -> Self {
        Self {
            session_id: row.session_id,
            room_id: row.room_id,
            initiator_user_id: row.initiator_user_id,
            participant_user_id: row.participant_user_id,
            appointment_ref: row.appointment_ref,
            match_ref: row.match_ref,
            thread_ref: row.thread_ref,
            status: row.status,
            recording_enabled: row.recording_enabled,
            recording_url: row.recording_url,
            duration_seconds: row.duration_seconds,
            rating: row.rating,
            created_at: row.created_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
        }
    }
}

/// Participant representation returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantResponse {
    pub participant_id: Uuid,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub connection_id: String,
    pub is_initiator: bool,
    pub camera_enabled: bool,
    pub microphone_enabled: bool,
    pub screen_share_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f32>,
    pub joined_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_at: Option<DateTime<Utc>>,
}

impl From<CallParticipantRow> for ParticipantResponse {
    fn from(row: CallParticipantRow) -> Self {
        Self {
            participant_id: row.participant_id,
            session_id: row.session_id,
            user_id: row.user_id,
            connection_id: row.connection_id,
            is_initiator: row.is_initiator,
            camera_enabled: row.camera_enabled,
            microphone_enabled: row.microphone_enabled,
            screen_share_enabled: row.screen_share_enabled,
            quality_score: row.quality_score,
            joined_at: row.joined_at,
            left_at: row.left_at,
        }
    }
}

/// Session plus its live participants, returned by session lookups.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetailResponse {
    #[serde(flatten)]
    pub session: SessionResponse,
    pub participants: Vec<ParticipantResponse>,
}

// ============================================================================
// History / Analytics API Models
// ============================================================================

/// Default history page size.
pub const DEFAULT_HISTORY_PER_PAGE: i64 = 20;

/// Maximum history page size.
pub const MAX_HISTORY_PER_PAGE: i64 = 100;

/// Query parameters for `GET /api/v1/users/me/calls`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    /// Only sessions created at or after this instant.
    pub from: Option<DateTime<Utc>>,

    /// Only sessions created before this instant.
    pub to: Option<DateTime<Utc>>,

    /// Only sessions in this status.
    pub status: Option<CallStatus>,

    /// 1-based page number.
    pub page: Option<i64>,

    /// Page size, capped at [`MAX_HISTORY_PER_PAGE`].
    pub per_page: Option<i64>,
}

impl HistoryQuery {
    /// Effective 1-based page number.
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    /// Effective page size, clamped to [1, MAX_HISTORY_PER_PAGE].
    pub fn per_page(&self) -> i64 {
        self.per_page
            .unwrap_or(DEFAULT_HISTORY_PER_PAGE)
            .clamp(1, MAX_HISTORY_PER_PAGE)
    }

    /// Row offset for the effective page.
    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.per_page()
    }
}

/// Paginated call history response.
#[derive(Debug, Clone, Serialize)]
pub struct CallHistoryResponse {
    pub sessions: Vec<SessionResponse>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

/// Per-hour session count bucket for the statistics response.
#[derive(Debug, Clone, Serialize)]
pub struct HourlyBucket {
    /// Hour of day in UTC (0-23).
    pub hour: i32,

    /// Sessions created in that hour across the query window.
    pub count: i64,
}

/// Aggregate call statistics for a user.
#[derive(Debug, Clone, Serialize)]
pub struct CallStatisticsResponse {
    pub total_calls: i64,
    pub completed_calls: i64,
    pub cancelled_calls: i64,

    /// completed / total, 0.0 when the user has no calls.
    pub completion_rate: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_duration_seconds: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f64>,

    /// Mean connection quality score across the user's participant rows,
    /// when any were scored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_quality_score: Option<f64>,

    pub hourly_distribution: Vec<HourlyBucket>,
}

// ============================================================================
// Key-Exchange Audit Models
// ============================================================================

/// Maximum stored key fingerprint length (hex characters).
pub const MAX_KEY_FINGERPRINT_LENGTH: usize = 64;

/// Append-only audit record for a key-exchange attempt.
///
/// Exactly one record is produced per inbound key-exchange message,
/// accepted or rejected. The encrypted payload itself is never stored;
/// only its size.
#[derive(Debug, Clone)]
pub struct E2eeAuditRecord {
    pub audit_id: Uuid,
    pub session_ref: Option<Uuid>,
    pub room_id: Option<String>,
    pub sender_user_id: Uuid,
    pub target_user_id: Option<Uuid>,
    pub message_type: E2eeMessageType,
    pub key_fingerprint: Option<String>,
    pub key_generation: Option<i32>,
    pub success: bool,
    pub error_code: Option<String>,
    pub payload_size: i32,
    pub was_rate_limited: bool,
    pub client_timestamp: Option<DateTime<Utc>>,
}
