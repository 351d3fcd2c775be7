use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::application::errors::StorageError;
use crate::domain::entities::{ChatId, ChatMessage, MessageId, NewMessage, UserId};

/// MessageStore trait - durable storage for messages and chat membership
#[async_trait]
pub trait MessageStore: Send + Sync {
    // Message operations
    async fn create_message(&self, message: &NewMessage) -> Result<MessageId, StorageError>;
    /// Messages of a chat, oldest first
    async fn get_chat_messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>, StorageError>;

    // Membership operations
    async fn get_chat_users(&self, chat_id: ChatId) -> Result<BTreeSet<UserId>, StorageError>;
    async fn get_user_chats(&self, user_id: UserId) -> Result<Vec<ChatId>, StorageError>;

    // Chat lifecycle
    async fn create_chat(&self) -> Result<ChatId, StorageError>;
    async fn add_user_to_chat(&self, chat_id: ChatId, user_id: UserId) -> Result<(), StorageError>;
    async fn delete_chat(&self, chat_id: ChatId) -> Result<(), StorageError>;
}
