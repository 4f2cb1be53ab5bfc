use super::{protocol as ws_protocol, teardown_connection, HubState};
use crate::{
    error::{request_id_from_headers_or_generate, with_request_id_scope, ErrorCode, HubError},
    metrics,
    registry::Outbound,
};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use strata_common::protocol::ws::{ClientMessage, ServerEvent};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Admission happens before the upgrade completes: a missing or invalid
/// token is rejected with HTTP 401 and no room state is touched.
pub async fn ws_upgrade(
    Path(room_id): Path<String>,
    Query(query): Query<WsQuery>,
    State(state): State<HubState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = query.token.filter(|token| !token.is_empty()) else {
        return HubError::new(ErrorCode::AuthInvalidToken, "missing token query parameter")
            .into_response();
    };

    let identity = match state.jwt_service.verify_token(&token) {
        Ok(identity) => identity,
        Err(_) => return HubError::from_code(ErrorCode::AuthInvalidToken).into_response(),
    };

    let request_id = request_id_from_headers_or_generate(&headers);
    ws.on_upgrade(move |socket| async move {
        with_request_id_scope(
            request_id,
            handle_socket(state, room_id, identity.user_id, socket),
        )
        .await;
    })
    .into_response()
}

async fn handle_socket(state: HubState, room_id: String, user_id: Uuid, mut socket: WebSocket) {
    let conn_id = Uuid::new_v4();
    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<Outbound>();

    let displaced = state.registry.register(user_id, &room_id, conn_id, outbound_sender).await;
    state.presence.track(user_id, &room_id).await;

    let replaced = displaced.is_some();
    if let Some(displaced) = displaced {
        if displaced.room_id != room_id {
            super::evict_from_previous_room(&state, user_id, &displaced.room_id).await;
        }
    }

    info!(user_id = %user_id, room_id = %room_id, conn_id = %conn_id, replaced, "websocket connected");

    state
        .registry
        .broadcast(
            &room_id,
            ServerEvent::UserJoined { user_id, timestamp: Utc::now() },
            Some(user_id),
        )
        .await;

    if send_join_events(&state, &room_id, user_id, &mut socket).await.is_err() {
        teardown_connection(&state, &room_id, user_id, conn_id).await;
        return;
    }

    loop {
        tokio::select! {
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(Outbound::Event(event)) => {
                        if ws_protocol::send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close { reason }) => {
                        let _ = socket
                            .send(Message::Close(Some(CloseFrame {
                                code: close_code::NORMAL,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        state.presence.touch(user_id).await;

                        let inbound = match ws_protocol::decode_client_message(&raw_message) {
                            Ok(inbound) => inbound,
                            Err(failure) if failure.is_unknown_type() => {
                                metrics::record_ws_message("unknown", true, 0);
                                warn!(user_id = %user_id, %failure, "ignoring websocket frame");
                                continue;
                            }
                            Err(failure) => {
                                metrics::record_ws_message("malformed", true, 0);
                                let error_event =
                                    ServerEvent::Error { message: failure.to_string() };
                                if ws_protocol::send_event(&mut socket, &error_event).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        };

                        if dispatch(&state, &room_id, user_id, &mut socket, inbound).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        debug!(user_id = %user_id, ?error, "websocket transport error");
                        break;
                    }
                }
            }
        }
    }

    teardown_connection(&state, &room_id, user_id, conn_id).await;
}

/// Unicast sequence delivered to a freshly registered connection:
/// membership snapshot, greeting, then chat replay.
async fn send_join_events(
    state: &HubState,
    room_id: &str,
    user_id: Uuid,
    socket: &mut WebSocket,
) -> Result<(), axum::Error> {
    let users = state.registry.room_members(room_id).await;
    ws_protocol::send_event(
        socket,
        &ServerEvent::RoomInfo { room_id: room_id.to_string(), users, timestamp: Utc::now() },
    )
    .await?;

    ws_protocol::send_event(
        socket,
        &ServerEvent::Connected { room_id: room_id.to_string(), user_id, timestamp: Utc::now() },
    )
    .await?;

    let messages = state.chat.history(room_id, crate::chat::CHAT_HISTORY_CAP).await;
    ws_protocol::send_event(socket, &ServerEvent::ChatHistory { messages }).await
}

fn message_type_label(message: &ClientMessage) -> &'static str {
    match message {
        ClientMessage::ChatMessage { .. } => "chat_message",
        ClientMessage::CursorUpdate { .. } => "cursor_update",
        ClientMessage::DocumentChange { .. } => "document_change",
        ClientMessage::StartCollaboration { .. } => "start_collaboration",
        ClientMessage::EndCollaboration { .. } => "end_collaboration",
        ClientMessage::Ping => "ping",
    }
}

/// Route one decoded frame. Returns `Err` only when the connection's own
/// socket is no longer writable; failures to reach peers never end the
/// sender's connection.
async fn dispatch(
    state: &HubState,
    room_id: &str,
    user_id: Uuid,
    socket: &mut WebSocket,
    message: ClientMessage,
) -> Result<(), axum::Error> {
    let label = message_type_label(&message);
    let started_at = Instant::now();
    let mut is_error = false;

    let result = match message {
        ClientMessage::ChatMessage { message, message_type } => {
            let chat_message = state.chat.record(room_id, user_id, message, message_type).await;
            state
                .registry
                .broadcast(room_id, ServerEvent::ChatMessage { message: chat_message }, None)
                .await;
            Ok(())
        }
        ClientMessage::CursorUpdate { position } => {
            let cursor = state.cursors.update(room_id, user_id, position).await;
            state
                .registry
                .broadcast(
                    room_id,
                    ServerEvent::CursorUpdate {
                        user_id,
                        position: cursor.position,
                        timestamp: cursor.updated_at,
                    },
                    Some(user_id),
                )
                .await;
            Ok(())
        }
        ClientMessage::DocumentChange { session_key, payload } => {
            // The accepted change is broadcast by the session manager,
            // under the same lock that assigns its version.
            match state.collab.apply_change(&session_key, user_id, payload, &state.registry).await
            {
                Some(_) => Ok(()),
                None => {
                    is_error = true;
                    ws_protocol::send_event(
                        socket,
                        &ServerEvent::Error {
                            message: format!(
                                "no active collaboration session `{session_key}` for this user"
                            ),
                        },
                    )
                    .await
                }
            }
        }
        ClientMessage::StartCollaboration { document_id } => {
            let session_key = state.collab.start(room_id, &document_id, user_id).await;
            state
                .registry
                .broadcast(
                    room_id,
                    ServerEvent::CollaborationStarted {
                        session_key,
                        document_id,
                        started_by: user_id,
                        timestamp: Utc::now(),
                    },
                    None,
                )
                .await;
            Ok(())
        }
        ClientMessage::EndCollaboration { document_id } => {
            if let Some(ended) = state.collab.end(room_id, &document_id, user_id).await {
                state
                    .registry
                    .broadcast(
                        room_id,
                        ServerEvent::CollaborationEnded {
                            session_key: ended.session_key,
                            document_id: ended.document_id,
                            ended_by: user_id,
                            timestamp: Utc::now(),
                        },
                        None,
                    )
                    .await;
            }
            Ok(())
        }
        ClientMessage::Ping => {
            ws_protocol::send_event(socket, &ServerEvent::Pong { timestamp: Utc::now() }).await
        }
    };

    metrics::record_ws_message(label, is_error, started_at.elapsed().as_millis() as u64);
    result
}
