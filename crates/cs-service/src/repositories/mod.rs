//! Repository layer for the Call Signaling Service.
//!
//! Provides database access following the Handler -> Repository pattern.
//! Lifecycle invariants (status guards, one live session per appointment,
//! one open participant row per user) are enforced in SQL so they hold
//! under concurrent callers.

pub mod analytics;
pub mod audit;
pub mod participants;
pub mod sessions;

pub use analytics::AnalyticsRepository;
pub use audit::AuditLogRepository;
pub use participants::ParticipantsRepository;
pub use sessions::SessionsRepository;
