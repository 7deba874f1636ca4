//! Session lifecycle handlers.
//!
//! Implements the REST surface for call sessions:
//!
//! - `POST /api/v1/sessions` - create a session for an appointment
//! - `GET /api/v1/sessions/{key}` - look up by session id, room id, or appointment ref
//! - `POST /api/v1/sessions/{id}/join` - record a participant joining
//! - `POST /api/v1/sessions/{id}/start` - transition pending -> active
//! - `POST /api/v1/sessions/{id}/leave` - record a participant leaving
//! - `POST /api/v1/sessions/{id}/end` - complete the call with its report
//! - `POST /api/v1/sessions/{id}/cancel` - cancel before or during the call
//!
//! All endpoints require a user bearer token; callers may only touch
//! sessions they initiate or are invited to. State transitions are enforced
//! in SQL with status guards, so concurrent callers cannot double-apply one.

use crate::auth::AuthenticatedUser;
use crate::errors::CsError;
use crate::models::{
    CallSessionRow, CallStatus, CreateSessionRequest, EndSessionRequest, JoinSessionRequest,
    ParticipantResponse, SessionDetailResponse, SessionResponse,
};
use crate::observability::metrics;
use crate::repositories::{ParticipantsRepository, SessionsRepository};
use crate::routes::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Handler for POST /api/v1/sessions.
///
/// Creates a pending session for an appointment. At most one live (pending
/// or active) session may exist per appointment ref; the uniqueness is
/// enforced atomically in the insert, so two racing creates cannot both
/// succeed.
///
/// # Response
///
/// - 201 Created: session created
/// - 400 Bad Request: invalid body
/// - 409 Conflict: a live session already exists for the appointment
#[instrument(skip_all, name = "cs.api.create_session")]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<SessionResponse>), CsError> {
    // Deserialize manually to return 400 instead of Axum's default 422
    let request: CreateSessionRequest = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!(target: "cs.handlers.sessions", error = %e, "Invalid request body");
        CsError::BadRequest("Invalid request body".to_string())
    })?;

    request.validate().map_err(CsError::BadRequest)?;

    if request.participant_user_id == user.user_id {
        return Err(CsError::BadRequest(
            "participant_user_id must not be the caller".to_string(),
        ));
    }

    let room_id = match request.room_id {
        Some(room_id) => room_id,
        None => format!("room-{}", Uuid::new_v4()),
    };

    let created = SessionsRepository::create_if_no_live_conflict(
        &state.pool,
        user.user_id,
        request.participant_user_id,
        &request.appointment_ref,
        &room_id,
        request.match_ref.as_deref(),
        request.thread_ref.as_deref(),
        request.recording_enabled,
    )
    .await?;

    let Some(session) = created else {
        metrics::record_session_transition("create", "conflict");
        return Err(CsError::Conflict(
            "A live session already exists for this appointment".to_string(),
        ));
    };

    metrics::record_session_transition("create", "success");
    tracing::info!(
        target: "cs.handlers.sessions",
        session_id = %session.session_id,
        room_id = %session.room_id,
        "Session created"
    );

    Ok((StatusCode::CREATED, Json(SessionResponse::from(session))))
}

/// Handler for GET /api/v1/sessions/{key}.
///
/// The key is resolved in order: session UUID, then room id, then
/// appointment ref. Room and appointment lookups prefer live sessions and
/// fall back to the most recent one.
#[instrument(skip_all, name = "cs.api.get_session")]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(key): Path<String>,
) -> Result<Json<SessionDetailResponse>, CsError> {
    let session = SessionsRepository::resolve(&state.pool, &key)
        .await?
        .ok_or_else(|| CsError::NotFound("Session not found".to_string()))?;

    authorize(&session, &user)?;

    let participants =
        ParticipantsRepository::open_participants(&state.pool, session.session_id).await?;

    Ok(Json(SessionDetailResponse {
        session: SessionResponse::from(session),
        participants: participants
            .into_iter()
            .map(ParticipantResponse::from)
            .collect(),
    }))
}

/// Handler for POST /api/v1/sessions/{id}/join.
///
/// Records the caller as an open participant. Joining is idempotent per
/// (session, user): a repeat join refreshes the existing open row rather
/// than stacking a second one. A completed session can still be joined
/// within the rejoin window, to let a dropped caller come back while the
/// counterpart is still around.
///
/// # Response
///
/// - 200 OK: participant row (created or refreshed)
/// - 403 Forbidden: caller is not part of the session
/// - 409 Conflict: session cancelled, or completed past the rejoin window
#[instrument(skip_all, name = "cs.api.join_session")]
pub async fn join_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<Uuid>,
    body: axum::body::Bytes,
) -> Result<Json<ParticipantResponse>, CsError> {
    let request: JoinSessionRequest = if body.is_empty() {
        JoinSessionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            tracing::debug!(target: "cs.handlers.sessions", error = %e, "Invalid request body");
            CsError::BadRequest("Invalid request body".to_string())
        })?
    };

    let session = SessionsRepository::find_by_id(&state.pool, session_id)
        .await?
        .ok_or_else(|| CsError::NotFound("Session not found".to_string()))?;

    authorize(&session, &user)?;

    if session.status.is_terminal() {
        // Only a completed session inside the rejoin window lets a dropped
        // caller back in; cancelled sessions never do.
        let rejoinable = session.status == CallStatus::Completed
            && within_rejoin_window(&session, state.config.rejoin_window_seconds);
        if !rejoinable {
            let message = match session.status {
                CallStatus::Cancelled => "Session has been cancelled",
                _ => "Session has ended",
            };
            return Err(CsError::Conflict(message.to_string()));
        }
    }

    let connection_id = match request.connection_id {
        Some(connection_id) => connection_id,
        None => format!("pending-{}", Uuid::new_v4()),
    };

    let participant = ParticipantsRepository::upsert_join(
        &state.pool,
        session.session_id,
        user.user_id,
        &connection_id,
        user.user_id == session.initiator_user_id,
        request.capabilities.unwrap_or_default(),
    )
    .await?;

    tracing::info!(
        target: "cs.handlers.sessions",
        session_id = %session.session_id,
        user_id = %user.user_id,
        "Participant joined"
    );

    Ok(Json(ParticipantResponse::from(participant)))
}

/// Handler for POST /api/v1/sessions/{id}/start.
///
/// Transitions pending -> active. Starting an already active session is a
/// no-op success, so both parties can race the call setup safely.
#[instrument(skip_all, name = "cs.api.start_session")]
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>, CsError> {
    let session = SessionsRepository::find_by_id(&state.pool, session_id)
        .await?
        .ok_or_else(|| CsError::NotFound("Session not found".to_string()))?;

    authorize(&session, &user)?;

    // Pre-flight on the freshly read row; the SQL status guard still
    // decides under concurrency.
    if session.status == CallStatus::Active {
        metrics::record_session_transition("start", "noop");
        return Ok(Json(SessionResponse::from(session)));
    }
    if !session.status.can_transition_to(CallStatus::Active) {
        metrics::record_session_transition("start", "conflict");
        return Err(CsError::Conflict("Session has already ended".to_string()));
    }

    if let Some(started) = SessionsRepository::try_start(&state.pool, session_id).await? {
        metrics::record_session_transition("start", "success");
        return Ok(Json(SessionResponse::from(started)));
    }

    // The pending guard did not match. Re-read to tell a benign race from
    // a real conflict.
    let current = SessionsRepository::find_by_id(&state.pool, session_id)
        .await?
        .ok_or_else(|| CsError::NotFound("Session not found".to_string()))?;

    if current.status == CallStatus::Active {
        metrics::record_session_transition("start", "noop");
        return Ok(Json(SessionResponse::from(current)));
    }

    metrics::record_session_transition("start", "conflict");
    Err(CsError::Conflict("Session has already ended".to_string()))
}

/// Handler for POST /api/v1/sessions/{id}/leave.
///
/// Closes the caller's open participant row. Idempotent; leaving twice, or
/// leaving a session never joined, is still a 200.
#[instrument(skip_all, name = "cs.api.leave_session")]
pub async fn leave_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, CsError> {
    let session = SessionsRepository::find_by_id(&state.pool, session_id)
        .await?
        .ok_or_else(|| CsError::NotFound("Session not found".to_string()))?;

    authorize(&session, &user)?;

    let closed =
        ParticipantsRepository::close_participant(&state.pool, session_id, user.user_id).await?;

    // An explicit leave clears the liveness entry; there is nothing left
    // for the sweep to evict.
    state.heartbeats.remove(session_id, user.user_id);

    tracing::info!(
        target: "cs.handlers.sessions",
        session_id = %session_id,
        user_id = %user.user_id,
        closed,
        "Participant left"
    );

    Ok(StatusCode::OK)
}

/// Handler for POST /api/v1/sessions/{id}/end.
///
/// Completes a live session with the caller's end-of-call report and closes
/// every open participant row. The status guard means only the first caller
/// completes; the loser of the race gets a 409.
#[instrument(skip_all, name = "cs.api.end_session")]
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<Uuid>,
    body: axum::body::Bytes,
) -> Result<Json<SessionResponse>, CsError> {
    let request: EndSessionRequest = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!(target: "cs.handlers.sessions", error = %e, "Invalid request body");
        CsError::BadRequest("Invalid request body".to_string())
    })?;

    request.validate().map_err(CsError::BadRequest)?;

    let session = SessionsRepository::find_by_id(&state.pool, session_id)
        .await?
        .ok_or_else(|| CsError::NotFound("Session not found".to_string()))?;

    authorize(&session, &user)?;

    if !session.status.can_transition_to(CallStatus::Completed) {
        metrics::record_session_transition("complete", "conflict");
        return Err(CsError::Conflict("Session has already ended".to_string()));
    }

    let completed = SessionsRepository::try_complete(
        &state.pool,
        session_id,
        request.duration_seconds,
        request.rating,
        request.feedback.as_deref(),
    )
    .await?;

    let Some(completed) = completed else {
        metrics::record_session_transition("complete", "conflict");
        return Err(CsError::Conflict("Session has already ended".to_string()));
    };

    let closed = ParticipantsRepository::close_all_for_session(&state.pool, session_id).await?;
    state.heartbeats.remove_session(session_id);
    metrics::record_session_transition("complete", "success");

    tracing::info!(
        target: "cs.handlers.sessions",
        session_id = %session_id,
        duration_seconds = request.duration_seconds,
        participants_closed = closed,
        "Session completed"
    );

    Ok(Json(SessionResponse::from(completed)))
}

/// Handler for POST /api/v1/sessions/{id}/cancel.
///
/// Cancels a pending or active session and closes any open participant
/// rows. Cancelling a terminal session is a 409.
#[instrument(skip_all, name = "cs.api.cancel_session")]
pub async fn cancel_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>, CsError> {
    let session = SessionsRepository::find_by_id(&state.pool, session_id)
        .await?
        .ok_or_else(|| CsError::NotFound("Session not found".to_string()))?;

    authorize(&session, &user)?;

    if !session.status.can_transition_to(CallStatus::Cancelled) {
        metrics::record_session_transition("cancel", "conflict");
        return Err(CsError::Conflict("Session has already ended".to_string()));
    }

    let Some(cancelled) = SessionsRepository::try_cancel(&state.pool, session_id).await? else {
        metrics::record_session_transition("cancel", "conflict");
        return Err(CsError::Conflict("Session has already ended".to_string()));
    };

    let closed = ParticipantsRepository::close_all_for_session(&state.pool, session_id).await?;
    state.heartbeats.remove_session(session_id);
    metrics::record_session_transition("cancel", "success");

    tracing::info!(
        target: "cs.handlers.sessions",
        session_id = %session_id,
        participants_closed = closed,
        "Session cancelled"
    );

    Ok(Json(SessionResponse::from(cancelled)))
}

/// Callers may only touch sessions they are part of.
fn authorize(session: &CallSessionRow, user: &AuthenticatedUser) -> Result<(), CsError> {
    if session.involves(user.user_id) {
        Ok(())
    } else {
        Err(CsError::Forbidden(
            "You are not a participant of this session".to_string(),
        ))
    }
}

/// A completed session accepts rejoins for a short window after it ends.
/// A window of zero disables rejoin entirely, including joins landing in
/// the same second the session ended.
fn within_rejoin_window(session: &CallSessionRow, window_seconds: u64) -> bool {
    if window_seconds == 0 {
        return false;
    }
    let Some(ended_at) = session.ended_at else {
        return false;
    };
    let elapsed = Utc::now().signed_duration_since(ended_at);
    elapsed.num_seconds() >= 0 && elapsed.num_seconds() as u64 <= window_seconds
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::jwt::BearerClaims;

    fn session_fixture(initiator: Uuid, participant: Uuid) -> CallSessionRow {
        CallSessionRow {
            session_id: Uuid::new_v4(),
            initiator_user_id: initiator,
            participant_user_id: participant,
            appointment_ref: "appt-1".to_string(),
            room_id: "room-1".to_string(),
            match_ref: None,
            thread_ref: None,
            status: CallStatus::Completed,
            recording_enabled: false,
            recording_url: None,
            duration_seconds: Some(300),
            rating: None,
            feedback: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            ended_at: Some(Utc::now()),
            updated_at: Utc::now(),
        }
    }

    fn user_fixture(user_id: Uuid) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id,
            claims: BearerClaims {
                sub: user_id.to_string(),
                exp: 0,
                iat: 0,
                name: None,
            },
        }
    }

    #[test]
    fn test_authorize_accepts_both_parties() {
        let initiator = Uuid::new_v4();
        let participant = Uuid::new_v4();
        let session = session_fixture(initiator, participant);

        assert!(authorize(&session, &user_fixture(initiator)).is_ok());
        assert!(authorize(&session, &user_fixture(participant)).is_ok());
    }

    #[test]
    fn test_authorize_rejects_stranger() {
        let session = session_fixture(Uuid::new_v4(), Uuid::new_v4());
        let result = authorize(&session, &user_fixture(Uuid::new_v4()));
        assert!(matches!(result, Err(CsError::Forbidden(_))));
    }

    #[test]
    fn test_rejoin_window_boundaries() {
        let mut session = session_fixture(Uuid::new_v4(), Uuid::new_v4());

        session.ended_at = Some(Utc::now() - Duration::seconds(60));
        assert!(within_rejoin_window(&session, 300));

        session.ended_at = Some(Utc::now() - Duration::seconds(400));
        assert!(!within_rejoin_window(&session, 300));

        session.ended_at = None;
        assert!(!within_rejoin_window(&session, 300));
    }

    #[test]
    fn test_rejoin_window_zero_disables_rejoin() {
        let mut session = session_fixture(Uuid::new_v4(), Uuid::new_v4());
        session.ended_at = Some(Utc::now() - Duration::seconds(5));
        assert!(!within_rejoin_window(&session, 0));

        // Even a join in the same instant the session ended is refused
        session.ended_at = Some(Utc::now());
        assert!(!within_rejoin_window(&session, 0));
    }
}
