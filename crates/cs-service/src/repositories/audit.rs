//! Key-exchange audit log repository.
//!
//! The `e2ee_audit_log` table is append-only: rows are inserted, never
//! updated or deleted. Insert failures are surfaced to the caller, which
//! logs them without blocking the relay path.

use crate::errors::CsError;
use crate::models::E2eeAuditRecord;
use crate::observability::metrics;
use sqlx::PgPool;
use std::time::Instant;
use tracing::instrument;

/// Key-exchange audit log repository.
pub struct AuditLogRepository;

impl AuditLogRepository {
    /// Append one audit record.
    #[instrument(skip_all, name = "cs.repo.insert_audit")]
    pub async fn insert(pool: &PgPool, record: &E2eeAuditRecord) -> Result<(), CsError> {
        let start = Instant::now();

        sqlx::query(
            r#"
            INSERT INTO e2ee_audit_log (
                audit_id, session_ref, room_id, sender_user_id, target_user_id,
                message_type, key_fingerprint, key_generation, success,
                error_code, payload_size, was_rate_limited, client_timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.audit_id) // $1
        .bind(record.session_ref) // $2
        .bind(record.room_id.as_deref()) // $3
        .bind(record.sender_user_id) // $4
        .bind(record.target_user_id) // $5
        .bind(record.message_type.as_str()) // $6
        .bind(record.key_fingerprint.as_deref()) // $7
        .bind(record.key_generation) // $8
        .bind(record.success) // $9
        .bind(record.error_code.as_deref()) // $10
        .bind(record.payload_size) // $11
        .bind(record.was_rate_limited) // $12
        .bind(record.client_timestamp) // $13
        .execute(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("insert_audit", "error", start.elapsed());
            CsError::Database(e.to_string())
        })?;

        metrics::record_db_query("insert_audit", "success", start.elapsed());

        Ok(())
    }
}
