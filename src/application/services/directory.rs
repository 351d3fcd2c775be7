//! Conversation directory - create, list and read chats through the message store

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::application::errors::{DirectoryError, StorageError};
use crate::domain::entities::{ChatId, ChatMessage, ChatSummary, UserId};
use crate::domain::traits::{IdentityProvider, MessageStore};

/// Read and create operations over conversations, fronting the message store
pub struct ConversationDirectory {
    store: Arc<dyn MessageStore>,
    identity: Arc<dyn IdentityProvider>,
}

impl ConversationDirectory {
    pub fn new(store: Arc<dyn MessageStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { store, identity }
    }

    /// Create a two-party chat and return it with the counterpart's profile.
    ///
    /// The counterpart must resolve before anything is written. A chat whose
    /// memberships could not all be added is deleted again.
    pub async fn create_conversation(
        &self,
        initiator_id: UserId,
        other_id: UserId,
    ) -> Result<ChatSummary, DirectoryError> {
        let companion = self.identity.public_profile(other_id).await?;

        let chat_id = self.store.create_chat().await?;
        for user_id in [initiator_id, other_id] {
            if let Err(e) = self.store.add_user_to_chat(chat_id, user_id).await {
                if let Err(cleanup) = self.store.delete_chat(chat_id).await {
                    tracing::error!("Failed to remove half-created chat {}: {}", chat_id, cleanup);
                }
                return Err(e.into());
            }
        }

        tracing::info!("Chat {} created for users {} and {}", chat_id, initiator_id, other_id);
        Ok(ChatSummary::new(chat_id, Some(companion)))
    }

    /// All chats of a user, each with the first other participant's profile
    pub async fn list_conversations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ChatSummary>, DirectoryError> {
        let chat_ids = self.store.get_user_chats(user_id).await?;

        let mut chats = Vec::with_capacity(chat_ids.len());
        for chat_id in chat_ids {
            let users = self.store.get_chat_users(chat_id).await?;
            let companion = match users.into_iter().find(|u| *u != user_id) {
                Some(other) => Some(self.identity.public_profile(other).await?),
                None => None,
            };
            chats.push(ChatSummary::new(chat_id, companion));
        }
        Ok(chats)
    }

    pub async fn list_participants(&self, chat_id: ChatId) -> Result<BTreeSet<UserId>, StorageError> {
        self.store.get_chat_users(chat_id).await
    }

    pub async fn is_participant(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, StorageError> {
        Ok(self.list_participants(chat_id).await?.contains(&user_id))
    }

    /// Full history of a chat, oldest first
    pub async fn chat_history(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>, StorageError> {
        self.store.get_chat_messages(chat_id).await
    }

    pub async fn delete_conversation(&self, chat_id: ChatId) -> Result<(), StorageError> {
        self.store.delete_chat(chat_id).await?;
        tracing::info!("Chat {} deleted", chat_id);
        Ok(())
    }
}
