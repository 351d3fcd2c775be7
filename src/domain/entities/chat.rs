use serde::{Deserialize, Serialize};

use super::UserProfile;

/// Conversation identifier, assigned by the message store
pub type ChatId = u64;

/// A conversation as listed for one of its participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_id: ChatId,
    /// Counterpart's public profile; absent when nobody else is in the chat
    pub companion: Option<UserProfile>,
}

impl ChatSummary {
    pub fn new(chat_id: ChatId, companion: Option<UserProfile>) -> Self {
        Self { chat_id, companion }
    }
}
