//! End-to-end encryption key-exchange auditing.
//!
//! The service never sees plaintext key material; payloads are opaque blobs.
//! What it does enforce, before relaying: the target must be legitimate, the
//! payload must fit the size limit, and each sender is rate-limited per
//! message type. Every inbound key-exchange message yields exactly one
//! append-only audit record, accepted or rejected.

use crate::models::{E2eeAuditRecord, E2eeMessageType, MAX_KEY_FINGERPRINT_LENGTH};
use crate::registry::{ConnectionRegistry, RoomMembership};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Rate-limit window length.
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Why a key-exchange message was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum E2eeRejection {
    /// The addressed target is not a legitimate recipient.
    InvalidTarget,

    /// The encrypted payload exceeds the configured size limit.
    PayloadTooLarge,

    /// The sender exceeded the per-type rate limit.
    RateLimited,
}

impl E2eeRejection {
    /// Stable wire code, recorded in the audit trail and returned to the
    /// sender in the `e2ee_result` frame.
    pub fn error_code(&self) -> &'static str {
        match self {
            E2eeRejection::InvalidTarget => "E2EE_INVALID_TARGET",
            E2eeRejection::PayloadTooLarge => "E2EE_PAYLOAD_TOO_LARGE",
            E2eeRejection::RateLimited => "E2EE_RATE_LIMIT",
        }
    }
}

/// Sliding-window rate limiter, per (sender, message type).
///
/// Timestamps use `tokio::time::Instant` so the window can be exercised
/// under `tokio::time::pause()` in tests.
#[derive(Debug, Clone)]
pub struct E2eeRateLimiter {
    windows: Arc<DashMap<(Uuid, E2eeMessageType), Vec<Instant>>>,
    limit: u32,
}

impl E2eeRateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            limit: limit_per_minute,
        }
    }

    /// Record an attempt and report whether it is within the limit.
    pub fn check_and_record(&self, sender: Uuid, message_type: E2eeMessageType) -> bool {
        let now = Instant::now();
        let mut window = self.windows.entry((sender, message_type)).or_default();
        window.retain(|t| now.duration_since(*t) < RATE_LIMIT_WINDOW);

        if window.len() >= self.limit as usize {
            return false;
        }
        window.push(now);
        true
    }

    /// Drop windows with no recent attempts. Called opportunistically by the
    /// liveness sweeper to bound memory.
    pub fn prune(&self) {
        let now = Instant::now();
        self.windows.retain(|_, window| {
            window.retain(|t| now.duration_since(*t) < RATE_LIMIT_WINDOW);
            !window.is_empty()
        });
    }
}

/// Inbound key-exchange message, as unpacked from the client frame.
#[derive(Debug, Clone)]
pub struct KeyExchangeInbound {
    pub message_type: E2eeMessageType,
    pub target_user_id: Option<Uuid>,
    pub room_id: Option<String>,
    pub encrypted_payload: String,
    pub key_fingerprint: Option<String>,
    pub key_generation: Option<i32>,
    pub session_id: Option<Uuid>,
    pub client_timestamp: Option<DateTime<Utc>>,
}

/// Validates key-exchange messages and produces their audit records.
#[derive(Debug, Clone)]
pub struct E2eeAuditor {
    registry: ConnectionRegistry,
    rooms: RoomMembership,
    rate_limiter: E2eeRateLimiter,
    max_payload_bytes: usize,
}

impl E2eeAuditor {
    pub fn new(
        registry: ConnectionRegistry,
        rooms: RoomMembership,
        rate_limiter: E2eeRateLimiter,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            registry,
            rooms,
            rate_limiter,
            max_payload_bytes,
        }
    }

    pub fn rate_limiter(&self) -> &E2eeRateLimiter {
        &self.rate_limiter
    }

    /// Run the acceptance checks in order: target, payload size, rate limit.
    ///
    /// The rate limit is checked last, so messages rejected for an invalid
    /// target or oversized payload do not consume the sender's budget.
    pub fn check(&self, sender: Uuid, inbound: &KeyExchangeInbound) -> Result<(), E2eeRejection> {
        self.check_target(sender, inbound)?;

        if inbound.encrypted_payload.len() > self.max_payload_bytes {
            return Err(E2eeRejection::PayloadTooLarge);
        }

        if !self
            .rate_limiter
            .check_and_record(sender, inbound.message_type)
        {
            return Err(E2eeRejection::RateLimited);
        }

        Ok(())
    }

    fn check_target(&self, sender: Uuid, inbound: &KeyExchangeInbound) -> Result<(), E2eeRejection> {
        match (&inbound.target_user_id, &inbound.room_id) {
            (Some(target), _) if *target == sender => Err(E2eeRejection::InvalidTarget),
            (Some(target), Some(room)) => {
                // A named target inside a named room must be a member
                if self.rooms.is_member(room, *target) {
                    Ok(())
                } else {
                    Err(E2eeRejection::InvalidTarget)
                }
            }
            (Some(target), None) => {
                // No room context; the target must at least be connected
                if self.registry.lookup(*target).is_some() {
                    Ok(())
                } else {
                    Err(E2eeRejection::InvalidTarget)
                }
            }
            (None, Some(room)) => {
                // Room-wide message (key rotation); requires live peers
                if self.rooms.other_members(room, sender).is_empty() {
                    Err(E2eeRejection::InvalidTarget)
                } else {
                    Ok(())
                }
            }
            (None, None) => Err(E2eeRejection::InvalidTarget),
        }
    }

    /// Build the audit record for an inbound message and its outcome.
    ///
    /// The encrypted payload is never stored; only its size. Fingerprints
    /// that are not plausible hex digests are dropped rather than stored.
    pub fn build_record(
        &self,
        sender: Uuid,
        inbound: &KeyExchangeInbound,
        outcome: Result<(), E2eeRejection>,
    ) -> E2eeAuditRecord {
        let payload_size = i32::try_from(inbound.encrypted_payload.len()).unwrap_or(i32::MAX);

        E2eeAuditRecord {
            audit_id: Uuid::new_v4(),
            session_ref: inbound.session_id,
            room_id: inbound.room_id.clone(),
            sender_user_id: sender,
            target_user_id: inbound.target_user_id,
            message_type: inbound.message_type,
            key_fingerprint: inbound
                .key_fingerprint
                .as_deref()
                .and_then(normalize_fingerprint),
            key_generation: inbound.key_generation,
            success: outcome.is_ok(),
            error_code: outcome.err().map(|r| r.error_code().to_string()),
            payload_size,
            was_rate_limited: outcome == Err(E2eeRejection::RateLimited),
            client_timestamp: inbound.client_timestamp,
        }
    }
}

/// Lowercase a fingerprint and reject anything that is not hex of a sane
/// length. Returns None for garbage rather than polluting the audit trail.
fn normalize_fingerprint(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_KEY_FINGERPRINT_LENGTH {
        return None;
    }
    let lowered = trimmed.to_ascii_lowercase();
    if hex::decode(&lowered).is_ok() {
        Some(lowered)
    } else {
        None
    }
}
