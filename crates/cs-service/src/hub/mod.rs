//! WebSocket signaling hub.
//!
//! `/ws` upgrades authenticated clients to a JSON-framed WebSocket. Each
//! socket gets a dedicated writer task fed by an mpsc channel; the handle
//! side of that channel is what the connection registry hands out, so relay
//! and broadcast paths never touch the socket directly.
//!
//! Dispatch is sequential per connection. A malformed frame produces an
//! error frame and the connection stays open; only transport failure or a
//! close frame ends the session.

pub mod e2ee;
pub mod protocol;
pub mod relay;

use crate::auth::AuthenticatedUser;
use crate::errors::CsError;
use crate::hub::e2ee::KeyExchangeInbound;
use crate::hub::protocol::{leave_reason, ClientMessage, ServerMessage};
use crate::models::CapabilityKind;
use crate::observability::metrics;
use crate::registry::{ConnectionHandle, CONNECTION_CHANNEL_BUFFER};
use crate::repositories::{AuditLogRepository, ParticipantsRepository};
use crate::routes::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::instrument;
use uuid::Uuid;

/// Query parameters for the WebSocket upgrade.
///
/// Browsers cannot set headers on WebSocket handshakes, so the bearer token
/// rides in the query string. `room` optionally joins a room immediately
/// after the upgrade completes.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: String,
    #[serde(default)]
    pub room: Option<String>,
}

/// Handler for GET /ws.
///
/// Validates the token before upgrading; a bad token is rejected with 401
/// while the connection is still plain HTTP.
#[instrument(skip_all, name = "cs.ws.upgrade")]
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, CsError> {
    let user = state.jwt_validator.validate(&params.token)?;
    let initial_room = params.room;

    Ok(ws.on_upgrade(move |socket| handle_socket(state, socket, user, initial_room)))
}

/// Drive one WebSocket connection until it closes.
async fn handle_socket(
    state: Arc<AppState>,
    socket: WebSocket,
    user: AuthenticatedUser,
    initial_room: Option<String>,
) {
    let user_id = user.user_id;
    let connection_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(CONNECTION_CHANNEL_BUFFER);

    let handle = ConnectionHandle::new(connection_id.clone(), tx.clone());
    if let Some(replaced) = state.registry.bind(user_id, handle) {
        tracing::info!(
            target: "cs.ws",
            user_id = %user_id,
            old_connection_id = %replaced.connection_id(),
            new_connection_id = %connection_id,
            "Superseding existing connection"
        );
    }
    metrics::record_ws_connection_change(1);
    tracing::info!(
        target: "cs.ws",
        user_id = %user_id,
        connection_id = %connection_id,
        "WebSocket connected"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: drains the channel into the socket. Serialization of
    // ServerMessage cannot fail (no maps with non-string keys), but a
    // transport error ends the task and with it the connection.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let frame = match serde_json::to_string(&message) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(target: "cs.ws", error = %e, "Frame serialization failed");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let mut current_room: Option<String> = None;

    if let Some(room_id) = initial_room {
        join_room(&state, &tx, user_id, &mut current_room, room_id).await;
    }

    while let Some(frame) = ws_rx.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(
                    target: "cs.ws",
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket read error"
                );
                break;
            }
        };

        match frame {
            Message::Text(text) => {
                let message: ClientMessage = match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::debug!(
                            target: "cs.ws",
                            connection_id = %connection_id,
                            error = %e,
                            "Unparseable client frame"
                        );
                        let _ = tx
                            .send(ServerMessage::Error {
                                code: "BAD_MESSAGE".to_string(),
                                message: "Message could not be parsed".to_string(),
                            })
                            .await;
                        continue;
                    }
                };
                dispatch(
                    &state,
                    &tx,
                    user_id,
                    &connection_id,
                    &mut current_room,
                    message,
                )
                .await;
            }
            Message::Close(_) => break,
            // Ping/pong handled by the transport, binary frames ignored
            _ => {}
        }
    }

    // Unbind only if this connection still owns the slot; a superseding
    // connection must not be torn down by its predecessor's cleanup.
    let owned_slot = state.registry.unbind(user_id, &connection_id);
    if owned_slot {
        if let Some(room_id) = current_room.take() {
            state.rooms.leave(&room_id, user_id);
            state
                .relay
                .broadcast(
                    &room_id,
                    Some(user_id),
                    ServerMessage::UserLeft {
                        room_id: room_id.clone(),
                        user_id,
                        reason: leave_reason::DISCONNECTED,
                    },
                )
                .await;
        }
    }
    // The heartbeat entry is deliberately NOT removed here. A user who
    // drops without an explicit leave must still be evicted by the sweep,
    // which also closes their participant row. A reconnect overwrites the
    // entry; leave/end/cancel clear it through the HTTP handlers.
    metrics::record_ws_connection_change(-1);
    writer.abort();

    tracing::info!(
        target: "cs.ws",
        user_id = %user_id,
        connection_id = %connection_id,
        owned_slot,
        "WebSocket disconnected"
    );
}

/// Handle one parsed client frame.
async fn dispatch(
    state: &Arc<AppState>,
    tx: &mpsc::Sender<ServerMessage>,
    user_id: Uuid,
    connection_id: &str,
    current_room: &mut Option<String>,
    message: ClientMessage,
) {
    match message {
        ClientMessage::JoinRoom { room_id } => {
            join_room(state, tx, user_id, current_room, room_id).await;
        }

        ClientMessage::SendOffer {
            room_id,
            target_user_id,
            sdp,
        } => {
            let result = state
                .relay
                .send_offer(&room_id, user_id, target_user_id, sdp)
                .await;
            if let Err(e) = result {
                let _ = tx
                    .send(ServerMessage::Error {
                        code: e.error_code().to_string(),
                        message: e.client_message(),
                    })
                    .await;
            }
        }

        ClientMessage::SendAnswer {
            room_id,
            target_user_id,
            sdp,
        } => {
            let result = state
                .relay
                .send_answer(&room_id, user_id, target_user_id, sdp)
                .await;
            if let Err(e) = result {
                let _ = tx
                    .send(ServerMessage::Error {
                        code: e.error_code().to_string(),
                        message: e.client_message(),
                    })
                    .await;
            }
        }

        ClientMessage::SendIceCandidate {
            room_id,
            target_user_id,
            candidate,
            sdp_mid,
            sdp_m_line_index,
        } => {
            state
                .relay
                .send_ice_candidate(
                    &room_id,
                    user_id,
                    target_user_id,
                    candidate,
                    sdp_mid,
                    sdp_m_line_index,
                )
                .await;
        }

        ClientMessage::SendHeartbeat { session_id } => {
            state
                .heartbeats
                .record(session_id, user_id, connection_id, current_room.as_deref());
            let _ = tx
                .send(ServerMessage::HeartbeatAck {
                    server_timestamp: Utc::now(),
                })
                .await;
        }

        ClientMessage::ToggleCamera {
            room_id,
            enabled,
            session_id,
        } => {
            toggle_capability(
                state,
                user_id,
                session_id,
                CapabilityKind::Camera,
                enabled,
            )
            .await;
            state
                .relay
                .broadcast(
                    &room_id,
                    Some(user_id),
                    ServerMessage::CameraToggled {
                        room_id: room_id.clone(),
                        user_id,
                        enabled,
                    },
                )
                .await;
        }

        ClientMessage::ToggleMicrophone {
            room_id,
            enabled,
            session_id,
        } => {
            toggle_capability(
                state,
                user_id,
                session_id,
                CapabilityKind::Microphone,
                enabled,
            )
            .await;
            state
                .relay
                .broadcast(
                    &room_id,
                    Some(user_id),
                    ServerMessage::MicrophoneToggled {
                        room_id: room_id.clone(),
                        user_id,
                        enabled,
                    },
                )
                .await;
        }

        ClientMessage::ToggleScreenShare {
            room_id,
            enabled,
            session_id,
        } => {
            toggle_capability(
                state,
                user_id,
                session_id,
                CapabilityKind::ScreenShare,
                enabled,
            )
            .await;
            state
                .relay
                .broadcast(
                    &room_id,
                    Some(user_id),
                    ServerMessage::ScreenShareToggled {
                        room_id: room_id.clone(),
                        user_id,
                        enabled,
                    },
                )
                .await;
        }

        ClientMessage::Chat { room_id, content } => {
            state
                .relay
                .broadcast(
                    &room_id,
                    Some(user_id),
                    ServerMessage::Chat {
                        room_id: room_id.clone(),
                        sender_user_id: user_id,
                        content,
                        sent_at: Utc::now(),
                    },
                )
                .await;
        }

        ClientMessage::E2ee {
            message_type,
            target_user_id,
            room_id,
            encrypted_payload,
            key_fingerprint,
            key_generation,
            session_id,
            client_timestamp,
        } => {
            let inbound = KeyExchangeInbound {
                message_type,
                target_user_id,
                room_id,
                encrypted_payload,
                key_fingerprint,
                key_generation,
                session_id,
                client_timestamp,
            };
            handle_key_exchange(state, tx, user_id, inbound).await;
        }
    }
}

/// Join `room_id`, leaving the current room first if needed.
async fn join_room(
    state: &Arc<AppState>,
    tx: &mpsc::Sender<ServerMessage>,
    user_id: Uuid,
    current_room: &mut Option<String>,
    room_id: String,
) {
    if current_room.as_deref() == Some(room_id.as_str()) {
        // Re-join of the same room; just re-ack with current membership
        let participants = state.rooms.other_members(&room_id, user_id);
        let _ = tx
            .send(ServerMessage::RoomJoined {
                room_id,
                participants,
                heartbeat_interval_seconds: state.config.heartbeat_interval_seconds,
            })
            .await;
        return;
    }

    if let Some(old_room) = current_room.take() {
        state.rooms.leave(&old_room, user_id);
        state
            .relay
            .broadcast(
                &old_room,
                Some(user_id),
                ServerMessage::UserLeft {
                    room_id: old_room.clone(),
                    user_id,
                    reason: leave_reason::LEFT,
                },
            )
            .await;
    }

    let participants = state.rooms.join(&room_id, user_id);
    tracing::info!(
        target: "cs.ws",
        user_id = %user_id,
        room_id = %room_id,
        peer_count = participants.len(),
        "Joined room"
    );

    state
        .relay
        .broadcast(
            &room_id,
            Some(user_id),
            ServerMessage::UserJoined {
                room_id: room_id.clone(),
                user_id,
            },
        )
        .await;

    let _ = tx
        .send(ServerMessage::RoomJoined {
            room_id: room_id.clone(),
            participants,
            heartbeat_interval_seconds: state.config.heartbeat_interval_seconds,
        })
        .await;

    *current_room = Some(room_id);
}

/// Persist a capability toggle when a session is named. Persistence failures
/// are logged and swallowed; the room broadcast happens either way.
async fn toggle_capability(
    state: &Arc<AppState>,
    user_id: Uuid,
    session_id: Option<Uuid>,
    capability: CapabilityKind,
    enabled: bool,
) {
    let Some(session_id) = session_id else {
        return;
    };
    if let Err(e) =
        ParticipantsRepository::set_capability(&state.pool, session_id, user_id, capability, enabled)
            .await
    {
        tracing::warn!(
            target: "cs.ws",
            session_id = %session_id,
            user_id = %user_id,
            error = %e,
            "Capability persistence failed"
        );
    }
}

/// Validate, audit, and relay one key-exchange message.
///
/// Every inbound message produces exactly one audit row, accepted or not.
/// A failed audit insert is logged but does not block the relay; losing a
/// frame over an audit hiccup would stall the client's key rotation.
async fn handle_key_exchange(
    state: &Arc<AppState>,
    tx: &mpsc::Sender<ServerMessage>,
    user_id: Uuid,
    inbound: KeyExchangeInbound,
) {
    let outcome = state.auditor.check(user_id, &inbound);
    let record = state.auditor.build_record(user_id, &inbound, outcome);

    if let Err(e) = AuditLogRepository::insert(&state.pool, &record).await {
        tracing::error!(
            target: "cs.e2ee",
            audit_id = %record.audit_id,
            sender_user_id = %user_id,
            error = %e,
            "Audit insert failed"
        );
    }

    match outcome {
        Ok(()) => {
            metrics::record_e2ee_message(inbound.message_type.as_str(), "accepted");
            let relayed = state
                .relay
                .send_key_exchange(
                    inbound.room_id.as_deref(),
                    user_id,
                    inbound.target_user_id,
                    ServerMessage::E2eeMessage {
                        message_type: inbound.message_type,
                        sender_user_id: user_id,
                        encrypted_payload: inbound.encrypted_payload,
                        key_fingerprint: inbound.key_fingerprint,
                        key_generation: inbound.key_generation,
                        room_id: inbound.room_id.clone(),
                    },
                )
                .await;
            if let Err(e) = relayed {
                tracing::debug!(
                    target: "cs.e2ee",
                    sender_user_id = %user_id,
                    error = %e,
                    "Key-exchange relay failed"
                );
            }
            let _ = tx
                .send(ServerMessage::E2eeResult {
                    success: true,
                    error_code: None,
                })
                .await;
        }
        Err(rejection) => {
            metrics::record_e2ee_message(inbound.message_type.as_str(), rejection.error_code());
            tracing::debug!(
                target: "cs.e2ee",
                sender_user_id = %user_id,
                error_code = rejection.error_code(),
                "Key-exchange message rejected"
            );
            let _ = tx
                .send(ServerMessage::E2eeResult {
                    success: false,
                    error_code: Some(rejection.error_code().to_string()),
                })
                .await;
        }
    }
}
