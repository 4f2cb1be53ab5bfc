//! WebSocket wire protocol between clients and the hub.
//!
//! Both directions use internally tagged JSON envelopes; the `type` field
//! selects the variant. Client frames with an unrecognized `type` are
//! ignored by the server, so new message types can ship without breaking
//! older peers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{ChatMessage, CursorPosition, DocumentChange};

fn default_message_type() -> String {
    "text".to_string()
}

/// Frames a client may send to the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ChatMessage {
        message: String,
        #[serde(default = "default_message_type")]
        message_type: String,
    },
    CursorUpdate {
        position: Value,
    },
    DocumentChange {
        session_key: String,
        payload: Value,
    },
    StartCollaboration {
        document_id: String,
    },
    EndCollaboration {
        document_id: String,
    },
    Ping,
}

/// Frames the hub sends to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Greeting unicast to a connection once it is fully registered.
    Connected {
        room_id: String,
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    /// Snapshot of current room membership, unicast after join.
    RoomInfo {
        room_id: String,
        users: Vec<Uuid>,
        timestamp: DateTime<Utc>,
    },
    UserJoined {
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    UserLeft {
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    /// Replay of the room's recent chat, unicast after join.
    ChatHistory {
        messages: Vec<ChatMessage>,
    },
    ChatMessage {
        message: ChatMessage,
    },
    CursorUpdate {
        user_id: Uuid,
        position: Value,
        timestamp: DateTime<Utc>,
    },
    DocumentChange {
        change: DocumentChange,
    },
    CollaborationStarted {
        session_key: String,
        document_id: String,
        started_by: Uuid,
        timestamp: DateTime<Utc>,
    },
    CollaborationEnded {
        session_key: String,
        document_id: String,
        ended_by: Uuid,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

/// Room cursor snapshot served by the admin API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomCursors {
    pub room_id: String,
    pub cursors: Vec<CursorPosition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_chat_message_defaults_message_type() {
        let frame: ClientMessage =
            serde_json::from_value(json!({"type": "chat_message", "message": "hi"}))
                .expect("frame should parse");
        assert_eq!(
            frame,
            ClientMessage::ChatMessage {
                message: "hi".into(),
                message_type: "text".into(),
            }
        );
    }

    #[test]
    fn client_frames_are_tagged_snake_case() {
        let frame: ClientMessage = serde_json::from_value(json!({
            "type": "start_collaboration",
            "document_id": "D1",
        }))
        .expect("frame should parse");
        assert_eq!(
            frame,
            ClientMessage::StartCollaboration {
                document_id: "D1".into()
            }
        );

        let ping: ClientMessage =
            serde_json::from_value(json!({"type": "ping"})).expect("ping should parse");
        assert_eq!(ping, ClientMessage::Ping);
    }

    #[test]
    fn server_events_carry_type_tag() {
        let event = ServerEvent::UserJoined {
            user_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(value["type"], "user_joined");

        let event = ServerEvent::Error {
            message: "bad frame".into(),
        };
        let value = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "bad frame");
    }

    #[test]
    fn document_change_event_nests_the_change() {
        let change = DocumentChange {
            session_key: "R1:D1".into(),
            user_id: Uuid::new_v4(),
            version: 1,
            payload: json!({"op": "insert"}),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(ServerEvent::DocumentChange {
            change: change.clone(),
        })
        .expect("event should serialize");
        assert_eq!(value["type"], "document_change");
        assert_eq!(value["change"]["session_key"], "R1:D1");
        assert_eq!(value["change"]["version"], 1);
    }
}
