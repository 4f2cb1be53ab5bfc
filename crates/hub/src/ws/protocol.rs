// Wire helpers for the websocket dispatcher.
//
// Decode distinguishes malformed frames (reported to the sender, the
// connection stays open) from well-formed frames of an unrecognized type
// (logged and ignored so newer clients keep working).

use axum::extract::ws::{Message, WebSocket};
use serde_json::Value;
use strata_common::protocol::ws::{ClientMessage, ServerEvent};
use thiserror::Error;
use tracing::error;

const KNOWN_CLIENT_TYPES: &[&str] = &[
    "chat_message",
    "cursor_update",
    "document_change",
    "start_collaboration",
    "end_collaboration",
    "ping",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeFailure {
    #[error("message is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("message has no string `type` field")]
    MissingType,
    #[error("malformed `{message_type}` message: {detail}")]
    InvalidPayload { message_type: String, detail: String },
    #[error("unrecognized message type `{0}`")]
    UnknownType(String),
}

impl DecodeFailure {
    pub fn is_unknown_type(&self) -> bool {
        matches!(self, Self::UnknownType(_))
    }
}

pub fn decode_client_message(raw: &str) -> Result<ClientMessage, DecodeFailure> {
    let value: Value =
        serde_json::from_str(raw).map_err(|error| DecodeFailure::InvalidJson(error.to_string()))?;

    let Some(message_type) = value.get("type").and_then(Value::as_str) else {
        return Err(DecodeFailure::MissingType);
    };

    if !KNOWN_CLIENT_TYPES.contains(&message_type) {
        return Err(DecodeFailure::UnknownType(message_type.to_string()));
    }

    let message_type = message_type.to_string();
    serde_json::from_value(value)
        .map_err(|error| DecodeFailure::InvalidPayload { message_type, detail: error.to_string() })
}

pub fn encode_event(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

pub async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), axum::Error> {
    match encode_event(event) {
        Ok(encoded) => socket.send(Message::Text(encoded.into())).await,
        Err(encode_error) => {
            error!(error = ?encode_error, "failed to encode server event");
            Ok(())
        }
    }
}
