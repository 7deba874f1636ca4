//! Call history and statistics handlers.
//!
//! - `GET /api/v1/users/me/calls` - paginated call history
//! - `GET /api/v1/users/me/calls/statistics` - aggregate statistics

use crate::auth::AuthenticatedUser;
use crate::errors::CsError;
use crate::models::{CallHistoryResponse, CallStatisticsResponse, HistoryQuery, SessionResponse};
use crate::repositories::{AnalyticsRepository, SessionsRepository};
use crate::routes::AppState;
use axum::extract::{Query, State};
use axum::{Extension, Json};
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /api/v1/users/me/calls.
///
/// Newest first. Page and page size are clamped server-side; an
/// out-of-range page just returns an empty list with the true total.
#[instrument(skip_all, name = "cs.api.call_history")]
pub async fn get_call_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<CallHistoryResponse>, CsError> {
    let (sessions, total) =
        SessionsRepository::call_history(&state.pool, user.user_id, &query).await?;

    Ok(Json(CallHistoryResponse {
        sessions: sessions.into_iter().map(SessionResponse::from).collect(),
        page: query.page(),
        per_page: query.per_page(),
        total,
    }))
}

/// Handler for GET /api/v1/users/me/calls/statistics.
///
/// Aggregates over the same optional `from`/`to` window the history
/// endpoint accepts; other history filters are ignored here.
#[instrument(skip_all, name = "cs.api.call_statistics")]
pub async fn get_call_statistics(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<CallStatisticsResponse>, CsError> {
    let stats =
        AnalyticsRepository::call_statistics(&state.pool, user.user_id, query.from, query.to)
            .await?;

    Ok(Json(stats))
}
