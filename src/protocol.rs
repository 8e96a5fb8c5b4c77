use crate::types::Task;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope types that travel over the socket
pub const TYPE_CHAT: &str = "chat";
pub const TYPE_AI_REQUEST: &str = "ai_request";

/// Raw wire envelope: `{"type": ..., "payload": ...}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiRequest {
    pub message: String,
}

/// Messages a client may send
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Informational, only logged
    Chat { payload: Value },
    AiRequest(AiRequest),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid message format: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid request format: {0}")]
    InvalidPayload(String),
}

impl DecodeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DecodeError::Malformed(_) => ErrorCode::ParseError,
            DecodeError::UnknownType(_) => ErrorCode::UnknownType,
            DecodeError::InvalidPayload(_) => ErrorCode::InvalidRequest,
        }
    }
}

impl ClientMessage {
    /// Decode a text frame into a client message.
    ///
    /// Only `chat` and `ai_request` are accepted inbound; every other type,
    /// including the server-only ones, is reported as unknown.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_str(text)?;

        match envelope.kind.as_str() {
            TYPE_CHAT => Ok(ClientMessage::Chat {
                payload: envelope.payload,
            }),
            TYPE_AI_REQUEST => {
                let request: AiRequest = serde_json::from_value(envelope.payload)
                    .map_err(|e| DecodeError::InvalidPayload(e.to_string()))?;
                if request.message.trim().is_empty() {
                    return Err(DecodeError::InvalidPayload(
                        "message must not be empty".to_string(),
                    ));
                }
                Ok(ClientMessage::AiRequest(request))
            }
            other => Err(DecodeError::UnknownType(other.to_string())),
        }
    }
}

/// Machine-readable error kind carried next to the human message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ParseError,
    UnknownType,
    InvalidRequest,
    Busy,
    AssistantUnavailable,
    AssistantFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    AiResponse { message: String },
    /// Broadcast to every connection when the assistant creates a task
    TaskCreated(Task),
    Error { message: String, code: ErrorCode },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            code,
        }
    }
}
