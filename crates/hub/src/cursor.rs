// Cursor tracking: last-write-wins positions per user per room.
// Ephemeral UI state with no history, dropped on disconnect.

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use serde_json::Value;
use strata_common::types::CursorPosition;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct CursorTracker {
    rooms: Arc<RwLock<HashMap<String, HashMap<Uuid, CursorPosition>>>>,
}

impl CursorTracker {
    /// Record a user's latest cursor position, returning the stored value.
    pub async fn update(&self, room_id: &str, user_id: Uuid, position: Value) -> CursorPosition {
        let cursor = CursorPosition { user_id, position, updated_at: Utc::now() };
        let mut guard = self.rooms.write().await;
        guard
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id, cursor.clone());
        cursor
    }

    pub async fn remove(&self, room_id: &str, user_id: Uuid) {
        let mut guard = self.rooms.write().await;
        if let Some(cursors) = guard.get_mut(room_id) {
            cursors.remove(&user_id);
            if cursors.is_empty() {
                guard.remove(room_id);
            }
        }
    }

    /// Snapshot of a room's cursors, sorted by user for stable output.
    pub async fn room_cursors(&self, room_id: &str) -> Vec<CursorPosition> {
        let guard = self.rooms.read().await;
        let mut cursors: Vec<CursorPosition> = guard
            .get(room_id)
            .map(|cursors| cursors.values().cloned().collect())
            .unwrap_or_default();
        cursors.sort_by_key(|cursor| cursor.user_id);
        cursors
    }
}
