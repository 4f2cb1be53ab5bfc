// Read-only admin surface served from live engine state. All routes
// require a bearer token signed with the hub secret.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use strata_common::protocol::ws::RoomCursors;

use crate::{
    auth::{jwt::JwtAuthService, middleware::require_bearer_auth},
    chat::CHAT_HISTORY_CAP,
    ws::HubState,
};

const DEFAULT_HISTORY_LIMIT: usize = 50;

pub fn router(state: HubState, jwt_service: Arc<JwtAuthService>) -> Router {
    let auth_layer = middleware::from_fn_with_state(jwt_service, require_bearer_auth);

    Router::new()
        .route("/v1/rooms/{room_id}/members", get(room_members))
        .route("/v1/rooms/{room_id}/chat-history", get(room_chat_history))
        .route("/v1/rooms/{room_id}/cursors", get(room_cursors))
        .route("/v1/collaboration/sessions", get(collaboration_sessions))
        .route_layer(auth_layer)
        .with_state(state)
}

async fn room_members(
    Path(room_id): Path<String>,
    State(state): State<HubState>,
) -> Json<Value> {
    let users = state.registry.room_members(&room_id).await;
    Json(json!({ "room_id": room_id, "users": users }))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn room_chat_history(
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
    State(state): State<HubState>,
) -> Json<Value> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(CHAT_HISTORY_CAP);
    let messages = state.chat.history(&room_id, limit).await;
    Json(json!({ "room_id": room_id, "messages": messages }))
}

async fn room_cursors(
    Path(room_id): Path<String>,
    State(state): State<HubState>,
) -> Json<RoomCursors> {
    let cursors = state.cursors.room_cursors(&room_id).await;
    Json(RoomCursors { room_id, cursors })
}

async fn collaboration_sessions(State(state): State<HubState>) -> Json<Value> {
    let sessions = state.collab.active_sessions().await;
    Json(json!({ "sessions": sessions }))
}
