//! Call participants repository.
//!
//! Owns the `call_participants` table. A participant has at most one open
//! row per session (left_at IS NULL), enforced by a partial unique index;
//! joins are idempotent upserts against that index so a reconnect refreshes
//! the existing row instead of duplicating it.

use crate::errors::CsError;
use crate::models::{CallParticipantRow, CapabilityKind, DeviceCapabilities};
use crate::observability::metrics;
use sqlx::{PgPool, Row};
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

const PARTICIPANT_COLUMNS: &str = r#"
    participant_id, session_id, user_id, connection_id, is_initiator,
    camera_enabled, microphone_enabled, screen_share_enabled,
    quality_score, joined_at, left_at, updated_at
"#;

/// Call participants repository.
pub struct ParticipantsRepository;

impl ParticipantsRepository {
    /// Record a join. Creates the open row, or refreshes it (connection id,
    /// capabilities) when the user rejoins an ongoing session.
    #[instrument(skip_all, name = "cs.repo.upsert_join")]
    pub async fn upsert_join(
        pool: &PgPool,
        session_id: Uuid,
        user_id: Uuid,
        connection_id: &str,
        is_initiator: bool,
        capabilities: DeviceCapabilities,
    ) -> Result<CallParticipantRow, CsError> {
        let start = Instant::now();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO call_participants (
                session_id, user_id, connection_id, is_initiator,
                camera_enabled, microphone_enabled, screen_share_enabled
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (session_id, user_id) WHERE left_at IS NULL
            DO UPDATE SET
                connection_id = EXCLUDED.connection_id,
                camera_enabled = EXCLUDED.camera_enabled,
                microphone_enabled = EXCLUDED.microphone_enabled,
                screen_share_enabled = EXCLUDED.screen_share_enabled,
                updated_at = NOW()
            RETURNING {PARTICIPANT_COLUMNS}
            "#
        ))
        .bind(session_id) // $1
        .bind(user_id) // $2
        .bind(connection_id) // $3
        .bind(is_initiator) // $4
        .bind(capabilities.camera_enabled) // $5
        .bind(capabilities.microphone_enabled) // $6
        .bind(capabilities.screen_share_enabled) // $7
        .fetch_one(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("upsert_join", "error", start.elapsed());
            CsError::Database(e.to_string())
        })?;

        metrics::record_db_query("upsert_join", "success", start.elapsed());

        Ok(map_row_to_participant(row))
    }

    /// Close the open row for (session, user), if any. Returns the number of
    /// rows closed (0 or 1); closing an already-closed participant is a no-op.
    #[instrument(skip_all, name = "cs.repo.close_participant")]
    pub async fn close_participant(
        pool: &PgPool,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, CsError> {
        let start = Instant::now();

        let result = sqlx::query(
            r#"
            UPDATE call_participants
            SET left_at = NOW(), updated_at = NOW()
            WHERE session_id = $1 AND user_id = $2 AND left_at IS NULL
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("close_participant", "error", start.elapsed());
            CsError::Database(e.to_string())
        })?;

        metrics::record_db_query("close_participant", "success", start.elapsed());

        Ok(result.rows_affected())
    }

    /// Close every open row for a session. Used when the session ends.
    #[instrument(skip_all, name = "cs.repo.close_all_for_session")]
    pub async fn close_all_for_session(pool: &PgPool, session_id: Uuid) -> Result<u64, CsError> {
        let start = Instant::now();

        let result = sqlx::query(
            r#"
            UPDATE call_participants
            SET left_at = NOW(), updated_at = NOW()
            WHERE session_id = $1 AND left_at IS NULL
            "#,
        )
        .bind(session_id)
        .execute(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("close_all_for_session", "error", start.elapsed());
            CsError::Database(e.to_string())
        })?;

        metrics::record_db_query("close_all_for_session", "success", start.elapsed());

        Ok(result.rows_affected())
    }

    /// Persist a capability toggle on the participant's open row.
    #[instrument(skip_all, name = "cs.repo.set_capability")]
    pub async fn set_capability(
        pool: &PgPool,
        session_id: Uuid,
        user_id: Uuid,
        capability: CapabilityKind,
        enabled: bool,
    ) -> Result<u64, CsError> {
        let start = Instant::now();

        // Column name comes from a bounded enum, never from input
        let column = capability.column();
        let result = sqlx::query(&format!(
            r#"
            UPDATE call_participants
            SET {column} = $3, updated_at = NOW()
            WHERE session_id = $1 AND user_id = $2 AND left_at IS NULL
            "#
        ))
        .bind(session_id)
        .bind(user_id)
        .bind(enabled)
        .execute(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("set_capability", "error", start.elapsed());
            CsError::Database(e.to_string())
        })?;

        metrics::record_db_query("set_capability", "success", start.elapsed());

        Ok(result.rows_affected())
    }

    /// Open participants for a session (joined and not yet left).
    #[instrument(skip_all, name = "cs.repo.open_participants")]
    pub async fn open_participants(
        pool: &PgPool,
        session_id: Uuid,
    ) -> Result<Vec<CallParticipantRow>, CsError> {
        let start = Instant::now();

        let rows = sqlx::query(&format!(
            r#"
            SELECT {PARTICIPANT_COLUMNS} FROM call_participants
            WHERE session_id = $1 AND left_at IS NULL
            ORDER BY joined_at
            "#
        ))
        .bind(session_id)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("open_participants", "error", start.elapsed());
            CsError::Database(e.to_string())
        })?;

        metrics::record_db_query("open_participants", "success", start.elapsed());

        Ok(rows.into_iter().map(map_row_to_participant).collect())
    }
}

/// Map a database row to a CallParticipantRow struct.
pub fn map_row_to_participant(row: sqlx::postgres::PgRow) -> CallParticipantRow {
    CallParticipantRow {
        participant_id: row.get("participant_id"),
        session_id: row.get("session_id"),
        user_id: row.get("user_id"),
        connection_id: row.get("connection_id"),
        is_initiator: row.get("is_initiator"),
        camera_enabled: row.get("camera_enabled"),
        microphone_enabled: row.get("microphone_enabled"),
        screen_share_enabled: row.get("screen_share_enabled"),
        quality_score: row.get("quality_score"),
        joined_at: row.get("joined_at"),
        left_at: row.get("left_at"),
        updated_at: row.get("updated_at"),
    }
}
