// Core domain types shared across the Strata crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A chat message, as held in a room's in-memory ring buffer and replayed
/// by `chat_history`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub room_id: String,
    pub user_id: Uuid,
    pub message: String,
    /// Message kind, e.g. "text" or "system".
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
}

/// An accepted, version-stamped document change.
///
/// The payload is opaque to the hub: changes are totally ordered within
/// their session, never merged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChange {
    pub session_key: String,
    pub user_id: Uuid,
    pub version: i64,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// A user's last-write-wins cursor position within a room. Advisory UI
/// state with no history and no durability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CursorPosition {
    pub user_id: Uuid,
    pub position: Value,
    pub updated_at: DateTime<Utc>,
}

/// Summary of an active collaboration session, as served by the admin API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub session_key: String,
    pub room_id: String,
    pub document_id: String,
    pub started_by: Uuid,
    pub started_at: DateTime<Utc>,
    pub participants: Vec<Uuid>,
    pub version: i64,
}

/// Composite key identifying a collaboration session within a room.
pub fn session_key(room_id: &str, document_id: &str) -> String {
    format!("{room_id}:{document_id}")
}
