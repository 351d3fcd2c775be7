use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChatId, UserId};

/// Message identifier, assigned by the message store on persist
pub type MessageId = u64;

/// Frame sent by a client over its connection
///
/// Any `sender_id` or timestamp the client includes is ignored: the sender
/// comes from the authenticated session and the time from the server clock.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InboundFrame {
    pub chat_id: ChatId,
    pub content: String,
}

impl InboundFrame {
    /// Decode a raw JSON frame (text or binary payload)
    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

/// A message stamped by the server but not yet persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    /// Stamp an inbound frame with its authenticated sender and the current time
    pub fn stamp(sender_id: UserId, frame: InboundFrame) -> Self {
        Self {
            chat_id: frame.chat_id,
            sender_id,
            content: frame.content,
            created_at: Utc::now(),
        }
    }

    pub fn persisted(self, message_id: MessageId) -> ChatMessage {
        ChatMessage {
            message_id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            content: self.content,
            created_at: self.created_at,
        }
    }
}

/// A persisted chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Event written to a client's connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum OutboundEvent {
    Message(ChatMessage),
    Error(String),
}

impl OutboundEvent {
    pub fn error(text: impl Into<String>) -> Self {
        OutboundEvent::Error(text.into())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
