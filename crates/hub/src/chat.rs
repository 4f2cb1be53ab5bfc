// Chat manager: a bounded in-memory ring buffer per room plus a
// best-effort durable append. History replay and broadcasts are served
// from memory only; the durable log exists for offline retention and is
// never on the live path.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use serde_json::json;
use strata_common::types::ChatMessage;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::store::EventLog;

/// Messages kept in memory per room; the oldest is dropped at the cap.
pub const CHAT_HISTORY_CAP: usize = 100;
/// Durable retention for chat messages.
pub const CHAT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Clone)]
pub struct ChatManager {
    rooms: Arc<RwLock<HashMap<String, VecDeque<ChatMessage>>>>,
    event_log: EventLog,
}

impl ChatManager {
    pub fn new(event_log: EventLog) -> Self {
        Self { rooms: Arc::new(RwLock::new(HashMap::new())), event_log }
    }

    /// Append a message to the room's ring buffer and hand it back for
    /// broadcast. The durable write happens on a spawned task so a slow
    /// or failing store cannot delay delivery.
    pub async fn record(
        &self,
        room_id: &str,
        user_id: Uuid,
        text: String,
        kind: String,
    ) -> ChatMessage {
        let message = ChatMessage {
            id: Uuid::new_v4(),
            room_id: room_id.to_string(),
            user_id,
            message: text,
            kind,
            timestamp: Utc::now(),
        };

        {
            let mut guard = self.rooms.write().await;
            let buffer = guard.entry(room_id.to_string()).or_default();
            if buffer.len() == CHAT_HISTORY_CAP {
                buffer.pop_front();
            }
            buffer.push_back(message.clone());
        }

        let event_log = self.event_log.clone();
        let stream_key = format!("chat:{room_id}");
        let payload = json!(message);
        tokio::spawn(async move {
            if let Err(error) = event_log.append(&stream_key, payload, CHAT_RETENTION).await {
                warn!(error = ?error, stream_key = %stream_key, "failed to persist chat message");
            }
        });

        message
    }

    /// The most recent messages for a room, oldest first.
    pub async fn history(&self, room_id: &str, limit: usize) -> Vec<ChatMessage> {
        let guard = self.rooms.read().await;
        let Some(buffer) = guard.get(room_id) else {
            return Vec::new();
        };

        let skip = buffer.len().saturating_sub(limit);
        buffer.iter().skip(skip).cloned().collect()
    }
}
