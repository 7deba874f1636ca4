//! Call sessions repository.
//!
//! Owns the `call_sessions` table. Lifecycle transitions are enforced in
//! SQL with status guards so concurrent mutations cannot race a session
//! into an illegal state, and the one-live-session-per-appointment rule is
//! enforced with an atomic conditional insert.
//!
//! All queries use parameterized statements.

use crate::errors::CsError;
use crate::models::{CallSessionRow, CallStatus, HistoryQuery};
use crate::observability::metrics;
use sqlx::{PgPool, Row};
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

const SESSION_COLUMNS: &str = r#"
    session_id, room_id, initiator_user_id, participant_user_id,
    appointment_ref, match_ref, thread_ref, status,
    recording_enabled, recording_url, duration_seconds, rating, feedback,
    created_at, started_at, ended_at, updated_at
"#;

/// Call sessions repository.
pub struct SessionsRepository;

impl SessionsRepository {
    /// Create a session, enforcing at most one live (pending or active)
    /// session per appointment reference.
    ///
    /// The existence check and the insert run as a single conditional
    /// statement, so two concurrent creates for the same appointment cannot
    /// both succeed. Returns `None` when a live session already exists.
    #[instrument(skip_all, name = "cs.repo.create_session")]
    #[expect(
        clippy::too_many_arguments,
        reason = "Represents all caller-supplied session columns for the atomic INSERT"
    )]
    pub async fn create_if_no_live_conflict(
        pool: &PgPool,
        initiator_user_id: Uuid,
        participant_user_id: Uuid,
        appointment_ref: &str,
        room_id: &str,
        match_ref: Option<&str>,
        thread_ref: Option<&str>,
        recording_enabled: bool,
    ) -> Result<Option<CallSessionRow>, CsError> {
        let start = Instant::now();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO call_sessions (
                initiator_user_id, participant_user_id, appointment_ref,
                room_id, match_ref, thread_ref, recording_enabled, status
            )
            SELECT $1, $2, $3, $4, $5, $6, $7, 'pending'
            WHERE NOT EXISTS (
                SELECT 1 FROM call_sessions
                WHERE appointment_ref = $3 AND status IN ('pending', 'active')
            )
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(initiator_user_id) // $1
        .bind(participant_user_id) // $2
        .bind(appointment_ref) // $3
        .bind(room_id) // $4
        .bind(match_ref) // $5
        .bind(thread_ref) // $6
        .bind(recording_enabled) // $7
        .fetch_optional(pool)
        .await;

        // Two racing inserts can both pass the NOT EXISTS check; the loser
        // then trips the partial unique index on live appointments. Treat
        // that exactly like losing the existence check.
        let row = match row {
            Ok(row) => row,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                metrics::record_db_query("create_session", "success", start.elapsed());
                return Ok(None);
            }
            Err(e) => {
                metrics::record_db_query("create_session", "error", start.elapsed());
                return Err(CsError::Database(e.to_string()));
            }
        };

        metrics::record_db_query("create_session", "success", start.elapsed());

        row.map(map_row_to_session).transpose()
    }

    /// Fetch a session by its primary key.
    #[instrument(skip_all, name = "cs.repo.find_session_by_id")]
    pub async fn find_by_id(
        pool: &PgPool,
        session_id: Uuid,
    ) -> Result<Option<CallSessionRow>, CsError> {
        let start = Instant::now();

        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM call_sessions WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("find_session_by_id", "error", start.elapsed());
            CsError::Database(e.to_string())
        })?;

        metrics::record_db_query("find_session_by_id", "success", start.elapsed());

        row.map(map_row_to_session).transpose()
    }

    /// Fetch the most relevant session for a room: the newest live session
    /// if one exists, otherwise the newest session overall.
    #[instrument(skip_all, name = "cs.repo.find_session_by_room")]
    pub async fn find_by_room(
        pool: &PgPool,
        room_id: &str,
    ) -> Result<Option<CallSessionRow>, CsError> {
        Self::find_preferring_live(pool, "room_id", room_id, "find_session_by_room").await
    }

    /// Fetch the most relevant session for an appointment reference, with
    /// the same live-first preference as [`find_by_room`].
    ///
    /// [`find_by_room`]: Self::find_by_room
    #[instrument(skip_all, name = "cs.repo.find_session_by_appointment")]
    pub async fn find_by_appointment(
        pool: &PgPool,
        appointment_ref: &str,
    ) -> Result<Option<CallSessionRow>, CsError> {
        Self::find_preferring_live(
            pool,
            "appointment_ref",
            appointment_ref,
            "find_session_by_appointment",
        )
        .await
    }

    async fn find_preferring_live(
        pool: &PgPool,
        column: &'static str,
        value: &str,
        operation: &'static str,
    ) -> Result<Option<CallSessionRow>, CsError> {
        let start = Instant::now();

        // `column` is a static identifier chosen by this module, never input
        let row = sqlx::query(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM call_sessions
            WHERE {column} = $1
            ORDER BY (status IN ('pending', 'active')) DESC, created_at DESC
            LIMIT 1
            "#
        ))
        .bind(value)
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query(operation, "error", start.elapsed());
            CsError::Database(e.to_string())
        })?;

        metrics::record_db_query(operation, "success", start.elapsed());

        row.map(map_row_to_session).transpose()
    }

    /// Resolve a session by a tri-level key: session UUID first, then room
    /// identifier, then appointment reference.
    #[instrument(skip_all, name = "cs.repo.resolve_session")]
    pub async fn resolve(pool: &PgPool, key: &str) -> Result<Option<CallSessionRow>, CsError> {
        if let Ok(session_id) = Uuid::parse_str(key) {
            if let Some(session) = Self::find_by_id(pool, session_id).await? {
                return Ok(Some(session));
            }
        }

        if let Some(session) = Self::find_by_room(pool, key).await? {
            return Ok(Some(session));
        }

        Self::find_by_appointment(pool, key).await
    }

    /// Transition a pending session to active, recording the start time.
    ///
    /// The status guard makes this safe under concurrency: only one caller
    /// observes the pending row. Returns `None` when the session was not
    /// pending (already started, ended, or missing).
    #[instrument(skip_all, name = "cs.repo.try_start_session")]
    pub async fn try_start(
        pool: &PgPool,
        session_id: Uuid,
    ) -> Result<Option<CallSessionRow>, CsError> {
        let start = Instant::now();

        let row = sqlx::query(&format!(
            r#"
            UPDATE call_sessions
            SET status = 'active', started_at = NOW(), updated_at = NOW()
            WHERE session_id = $1 AND status = 'pending'
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(session_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("try_start_session", "error", start.elapsed());
            CsError::Database(e.to_string())
        })?;

        metrics::record_db_query("try_start_session", "success", start.elapsed());

        row.map(map_row_to_session).transpose()
    }

    /// Transition a live session to completed, recording the end-of-call
    /// report. Returns `None` when the session was already terminal.
    #[instrument(skip_all, name = "cs.repo.complete_session")]
    pub async fn try_complete(
        pool: &PgPool,
        session_id: Uuid,
        duration_seconds: i32,
        rating: Option<i16>,
        feedback: Option<&str>,
    ) -> Result<Option<CallSessionRow>, CsError> {
        let start = Instant::now();

        let row = sqlx::query(&format!(
            r#"
            UPDATE call_sessions
            SET status = 'completed', ended_at = NOW(), updated_at = NOW(),
                duration_seconds = $2, rating = $3, feedback = $4
            WHERE session_id = $1 AND status IN ('pending', 'active')
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(session_id) // $1
        .bind(duration_seconds) // $2
        .bind(rating) // $3
        .bind(feedback) // $4
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("complete_session", "error", start.elapsed());
            CsError::Database(e.to_string())
        })?;

        metrics::record_db_query("complete_session", "success", start.elapsed());

        row.map(map_row_to_session).transpose()
    }

    /// Transition a live session to cancelled. Returns `None` when the
    /// session was already terminal.
    #[instrument(skip_all, name = "cs.repo.cancel_session")]
    pub async fn try_cancel(
        pool: &PgPool,
        session_id: Uuid,
    ) -> Result<Option<CallSessionRow>, CsError> {
        let start = Instant::now();

        let row = sqlx::query(&format!(
            r#"
            UPDATE call_sessions
            SET status = 'cancelled', ended_at = NOW(), updated_at = NOW()
            WHERE session_id = $1 AND status IN ('pending', 'active')
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(session_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("cancel_session", "error", start.elapsed());
            CsError::Database(e.to_string())
        })?;

        metrics::record_db_query("cancel_session", "success", start.elapsed());

        row.map(map_row_to_session).transpose()
    }

    /// Paginated call history for a user, newest first.
    ///
    /// Returns the page of sessions plus the total row count for the filter.
    #[instrument(skip_all, name = "cs.repo.call_history")]
    pub async fn call_history(
        pool: &PgPool,
        user_id: Uuid,
        query: &HistoryQuery,
    ) -> Result<(Vec<CallSessionRow>, i64), CsError> {
        let start = Instant::now();
        let status_filter = query.status.map(|s| s.as_str());

        let rows = sqlx::query(&format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM call_sessions
            WHERE (initiator_user_id = $1 OR participant_user_id = $1)
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
              AND ($4::text IS NULL OR status = $4)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#
        ))
        .bind(user_id) // $1
        .bind(query.from) // $2
        .bind(query.to) // $3
        .bind(status_filter) // $4
        .bind(query.per_page()) // $5
        .bind(query.offset()) // $6
        .fetch_all(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("call_history", "error", start.elapsed());
            CsError::Database(e.to_string())
        })?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM call_sessions
            WHERE (initiator_user_id = $1 OR participant_user_id = $1)
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
              AND ($4::text IS NULL OR status = $4)
            "#,
        )
        .bind(user_id)
        .bind(query.from)
        .bind(query.to)
        .bind(status_filter)
        .fetch_one(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("call_history", "error", start.elapsed());
            CsError::Database(e.to_string())
        })?;

        metrics::record_db_query("call_history", "success", start.elapsed());

        let sessions = rows
            .into_iter()
            .map(map_row_to_session)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((sessions, total))
    }
}

/// Map a database row to a CallSessionRow struct.
///
/// Shared by all queries that return session rows. A status value outside
/// the known set indicates schema drift and is reported as a database error.
pub fn map_row_to_session(row: sqlx::postgres::PgRow) -> Result<CallSessionRow, CsError> {
    let raw_status: String = row.get("status");
    let status = CallStatus::parse(&raw_status).ok_or_else(|| {
        CsError::Database(format!("unknown session status '{}'", raw_status))
    })?;

    Ok(CallSessionRow {
        session_id: row.get("session_id"),
        room_id: row.get("room_id"),
        initiator_user_id: row.get("initiator_user_id"),
        participant_user_id: row.get("participant_user_id"),
        appointment_ref: row.get("appointment_ref"),
        match_ref: row.get("match_ref"),
        thread_ref: row.get("thread_ref"),
        status,
        recording_enabled: row.get("recording_enabled"),
        recording_url: row.get("recording_url"),
        duration_seconds: row.get("duration_seconds"),
        rating: row.get("rating"),
        feedback: row.get("feedback"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
        updated_at: row.get("updated_at"),
    })
}
