pub mod handler;
pub mod protocol;

use std::sync::Arc;

use axum::{routing::get, Router};
use chrono::Utc;
use strata_common::protocol::ws::ServerEvent;
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::jwt::JwtAuthService,
    chat::ChatManager,
    collab::CollabSessionManager,
    cursor::CursorTracker,
    metrics,
    presence::PresenceTracker,
    registry::{ConnectionRegistry, ForceCloseOutcome},
    store::EventLog,
};

/// Shared handles threaded through the websocket and admin surfaces.
/// Every field is cheaply cloneable; the trackers share state internally.
#[derive(Clone)]
pub struct HubState {
    pub registry: ConnectionRegistry,
    pub presence: PresenceTracker,
    pub cursors: CursorTracker,
    pub chat: ChatManager,
    pub collab: CollabSessionManager,
    pub event_log: EventLog,
    pub jwt_service: Arc<JwtAuthService>,
}

impl HubState {
    pub fn new(event_log: EventLog, jwt_service: Arc<JwtAuthService>) -> Self {
        Self {
            registry: ConnectionRegistry::default(),
            presence: PresenceTracker::default(),
            cursors: CursorTracker::default(),
            chat: ChatManager::new(event_log.clone()),
            collab: CollabSessionManager::new(event_log.clone()),
            event_log,
            jwt_service,
        }
    }
}

pub fn router(state: HubState) -> Router {
    Router::new()
        .route("/v1/rooms/{room_id}/ws", get(handler::ws_upgrade))
        .with_state(state)
}

/// The single teardown path for a connection. Guarded by `conn_id` so a
/// replaced connection's exit cannot dismantle its successor's state.
pub(crate) async fn teardown_connection(
    state: &HubState,
    room_id: &str,
    user_id: Uuid,
    conn_id: Uuid,
) {
    if state.registry.remove(user_id, conn_id).await.is_none() {
        return;
    }

    state.presence.remove(user_id).await;
    state.cursors.remove(room_id, user_id).await;
    let ended_sessions = state.collab.remove_user(user_id).await;

    state
        .registry
        .broadcast(room_id, ServerEvent::UserLeft { user_id, timestamp: Utc::now() }, None)
        .await;

    broadcast_ended_sessions(state, user_id, ended_sessions).await;

    info!(user_id = %user_id, room_id = %room_id, conn_id = %conn_id, "websocket disconnected");
}

/// Cleanup for a connection displaced by a reconnect into a different
/// room. The stale connection's own teardown is conn_id-guarded and will
/// no-op, so the old room must be notified here: the user's cursor and
/// session participation there are dropped and `user_left` is broadcast.
pub(crate) async fn evict_from_previous_room(state: &HubState, user_id: Uuid, old_room_id: &str) {
    state.cursors.remove(old_room_id, user_id).await;
    let ended_sessions = state.collab.remove_user(user_id).await;

    state
        .registry
        .broadcast(old_room_id, ServerEvent::UserLeft { user_id, timestamp: Utc::now() }, None)
        .await;

    broadcast_ended_sessions(state, user_id, ended_sessions).await;

    info!(user_id = %user_id, old_room_id = %old_room_id, "user moved rooms on reconnect");
}

async fn broadcast_ended_sessions(
    state: &HubState,
    ended_by: Uuid,
    ended_sessions: Vec<crate::collab::EndedSession>,
) {
    for ended in ended_sessions {
        state
            .registry
            .broadcast(
                &ended.room_id,
                ServerEvent::CollaborationEnded {
                    session_key: ended.session_key,
                    document_id: ended.document_id,
                    ended_by,
                    timestamp: Utc::now(),
                },
                None,
            )
            .await;
    }
}

/// Force-disconnect a user (reaper eviction). Normally the close control
/// reaches the socket task, which runs teardown itself; if the channel is
/// already gone the teardown runs here.
pub(crate) async fn force_disconnect(state: &HubState, user_id: Uuid, reason: &'static str) {
    match state.registry.force_close(user_id, reason).await {
        ForceCloseOutcome::Signaled => {
            metrics::increment_reaped_connections();
        }
        ForceCloseOutcome::ChannelClosed { room_id, conn_id } => {
            metrics::increment_reaped_connections();
            teardown_connection(state, &room_id, user_id, conn_id).await;
        }
        ForceCloseOutcome::NotConnected => {}
    }
}
