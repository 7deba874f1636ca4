//! Call analytics repository.
//!
//! Aggregate read-only queries over `call_sessions` for the statistics
//! endpoint. Heavier than the history queries but still bounded by the
//! per-user filter.

use crate::errors::CsError;
use crate::models::{CallStatisticsResponse, HourlyBucket};
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// Call analytics repository.
pub struct AnalyticsRepository;

impl AnalyticsRepository {
    /// Aggregate call statistics for a user over an optional time window.
    #[instrument(skip_all, name = "cs.repo.call_statistics")]
    pub async fn call_statistics(
        pool: &PgPool,
        user_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<CallStatisticsResponse, CsError> {
        let start = Instant::now();

        let totals = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_calls,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed_calls,
                COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled_calls,
                (AVG(duration_seconds) FILTER (WHERE status = 'completed'))::float8
                    AS average_duration_seconds,
                (AVG(rating) FILTER (WHERE rating IS NOT NULL))::float8 AS average_rating
            FROM call_sessions
            WHERE (initiator_user_id = $1 OR participant_user_id = $1)
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_one(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("call_statistics", "error", start.elapsed());
            CsError::Database(e.to_string())
        })?;

        let quality = sqlx::query(
            r#"
            SELECT (AVG(p.quality_score))::float8 AS average_quality_score
            FROM call_participants p
            JOIN call_sessions s ON s.session_id = p.session_id
            WHERE p.user_id = $1
              AND p.quality_score IS NOT NULL
              AND ($2::timestamptz IS NULL OR s.created_at >= $2)
              AND ($3::timestamptz IS NULL OR s.created_at < $3)
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_one(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("call_statistics", "error", start.elapsed());
            CsError::Database(e.to_string())
        })?;

        let hourly_rows = sqlx::query(
            r#"
            SELECT EXTRACT(HOUR FROM created_at)::int AS hour, COUNT(*) AS count
            FROM call_sessions
            WHERE (initiator_user_id = $1 OR participant_user_id = $1)
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
            GROUP BY hour
            ORDER BY hour
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            metrics::record_db_query("call_statistics", "error", start.elapsed());
            CsError::Database(e.to_string())
        })?;

        metrics::record_db_query("call_statistics", "success", start.elapsed());

        let total_calls: i64 = totals.get("total_calls");
        let completed_calls: i64 = totals.get("completed_calls");
        let cancelled_calls: i64 = totals.get("cancelled_calls");

        // Averages are cast to float8 in SQL; NULL when nothing to average
        let average_duration_seconds: Option<f64> = totals.get("average_duration_seconds");
        let average_rating: Option<f64> = totals.get("average_rating");
        let average_quality_score: Option<f64> = quality.get("average_quality_score");

        let completion_rate = if total_calls > 0 {
            completed_calls as f64 / total_calls as f64
        } else {
            0.0
        };

        let hourly_distribution = hourly_rows
            .into_iter()
            .map(|row| HourlyBucket {
                hour: row.get("hour"),
                count: row.get("count"),
            })
            .collect();

        Ok(CallStatisticsResponse {
            total_calls,
            completed_calls,
            cancelled_calls,
            completion_rate,
            average_duration_seconds,
            average_rating,
            average_quality_score,
            hourly_distribution,
        })
    }
}
