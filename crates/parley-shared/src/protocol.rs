//! JSON event protocol spoken over a live connection.
//!
//! Every frame is a text frame shaped `{"event": <name>, "data": <payload>}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_MESSAGE_LENGTH;
use crate::types::ChatId;

/// Inbound: create a message in a chat.
pub const CREATE_MESSAGE: &str = "create-message";
/// Inbound: load a chat and its recent history.
pub const LOAD_CHAT: &str = "load-chat";
/// Outbound: a new message, pushed to every online member of the chat.
pub const MESSAGE_RECEIVED: &str = "message-received";
/// Outbound: reply to `load-chat`.
pub const CHAT_LOADED: &str = "chat-loaded";
/// Outbound: failure report, only ever sent to the originating connection.
pub const ERROR: &str = "error";

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// All events a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    CreateMessage(CreateMessage),
    LoadChat(LoadChat),
}

impl ClientEvent {
    /// Parse one text frame.
    pub fn from_frame(frame: &str) -> Result<Self, Vec<FieldError>> {
        serde_json::from_str(frame)
            .map_err(|e| vec![FieldError::general(format!("Invalid event frame: {e}"))])
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::CreateMessage(_) => CREATE_MESSAGE,
            ClientEvent::LoadChat(_) => LOAD_CHAT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessage {
    pub chat_id: String,
    /// Plaintext as typed by the user.
    pub message_text: String,
}

impl CreateMessage {
    /// Check the payload and return the parsed chat id.
    pub fn validate(&self) -> Result<ChatId, Vec<FieldError>> {
        let mut errors = Vec::new();

        let chat_id = parse_chat_id(&self.chat_id, &mut errors);

        if self.message_text.trim().is_empty() {
            errors.push(FieldError::field("messageText", "messageText must not be empty"));
        } else if self.message_text.chars().count() > MAX_MESSAGE_LENGTH {
            errors.push(FieldError::field(
                "messageText",
                format!("messageText must be at most {MAX_MESSAGE_LENGTH} characters"),
            ));
        }

        match chat_id {
            Some(id) if errors.is_empty() => Ok(id),
            _ => Err(errors),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadChat {
    pub chat_id: String,
}

impl LoadChat {
    pub fn validate(&self) -> Result<ChatId, Vec<FieldError>> {
        let mut errors = Vec::new();
        parse_chat_id(&self.chat_id, &mut errors).ok_or(errors)
    }
}

fn parse_chat_id(raw: &str, errors: &mut Vec<FieldError>) -> Option<ChatId> {
    match ChatId::parse(raw.trim()) {
        Ok(id) => Some(id),
        Err(_) => {
            errors.push(FieldError::field("chatId", "chatId must be a valid UUID"));
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// `{status: "success", data: ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    pub status: ResponseStatus,
    pub data: T,
}

/// One entry of [`ErrorPayload::errors`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub message: String,
    pub field: Option<String>,
}

impl FieldError {
    pub fn general(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
        }
    }

    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

/// Body of the outbound `error` event.
///
/// `stack` and `date_time` are only filled in development mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub status: ResponseStatus,
    pub message: String,
    pub errors: Vec<FieldError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<Utc>>,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>, errors: Vec<FieldError>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
            errors,
            stack: None,
            date_time: None,
        }
    }

    pub fn with_diagnostics(mut self, stack: String) -> Self {
        self.stack = Some(stack);
        self.date_time = Some(Utc::now());
        self
    }
}

/// One outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    pub event: String,
    pub data: serde_json::Value,
}

impl ServerEvent {
    /// Wrap `payload` as `{status: "success", data: payload}` under `event`.
    pub fn success<T: Serialize>(event: &str, payload: &T) -> Result<Self, serde_json::Error> {
        let envelope = SuccessEnvelope {
            status: ResponseStatus::Success,
            data: payload,
        };
        Ok(Self {
            event: event.to_string(),
            data: serde_json::to_value(envelope)?,
        })
    }

    pub fn error(payload: &ErrorPayload) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: ERROR.to_string(),
            data: serde_json::to_value(payload)?,
        })
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
