//! In-memory storage implementations

use async_trait::async_trait;
use parking_lot::RwLock as SyncRwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;

use crate::application::errors::{IdentityError, StorageError};
use crate::domain::entities::{ChatId, ChatMessage, MessageId, NewMessage, UserId, UserProfile};
use crate::domain::traits::{IdentityProvider, MessageStore};

#[derive(Default)]
struct Chats {
    last_chat_id: ChatId,
    last_message_id: MessageId,
    members: BTreeMap<ChatId, BTreeSet<UserId>>,
    messages: HashMap<ChatId, Vec<ChatMessage>>,
}

/// Process-local message store
#[derive(Default)]
pub struct MemoryStore {
    chats: RwLock<Chats>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn no_chat(chat_id: ChatId) -> StorageError {
    StorageError::NotFound(format!("chat {}", chat_id))
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create_message(&self, message: &NewMessage) -> Result<MessageId, StorageError> {
        let mut chats = self.chats.write().await;
        let members = chats.members.get(&message.chat_id).ok_or_else(|| {
            StorageError::ConstraintViolation(format!("chat {} does not exist", message.chat_id))
        })?;
        if !members.contains(&message.sender_id) {
            return Err(StorageError::ConstraintViolation(format!(
                "user {} is not a member of chat {}",
                message.sender_id, message.chat_id
            )));
        }

        chats.last_message_id += 1;
        let message_id = chats.last_message_id;
        chats
            .messages
            .entry(message.chat_id)
            .or_default()
            .push(message.clone().persisted(message_id));
        Ok(message_id)
    }

    async fn get_chat_messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>, StorageError> {
        let chats = self.chats.read().await;
        if !chats.members.contains_key(&chat_id) {
            return Err(no_chat(chat_id));
        }
        Ok(chats.messages.get(&chat_id).cloned().unwrap_or_default())
    }

    async fn get_chat_users(&self, chat_id: ChatId) -> Result<BTreeSet<UserId>, StorageError> {
        let chats = self.chats.read().await;
        chats.members.get(&chat_id).cloned().ok_or_else(|| no_chat(chat_id))
    }

    async fn get_user_chats(&self, user_id: UserId) -> Result<Vec<ChatId>, StorageError> {
        let chats = self.chats.read().await;
        Ok(chats
            .members
            .iter()
            .filter(|(_, users)| users.contains(&user_id))
            .map(|(chat_id, _)| *chat_id)
            .collect())
    }

    async fn create_chat(&self) -> Result<ChatId, StorageError> {
        let mut chats = self.chats.write().await;
        chats.last_chat_id += 1;
        let chat_id = chats.last_chat_id;
        chats.members.insert(chat_id, BTreeSet::new());
        Ok(chat_id)
    }

    async fn add_user_to_chat(&self, chat_id: ChatId, user_id: UserId) -> Result<(), StorageError> {
        let mut chats = self.chats.write().await;
        let members = chats.members.get_mut(&chat_id).ok_or_else(|| {
            StorageError::ConstraintViolation(format!("chat {} does not exist", chat_id))
        })?;
        if !members.insert(user_id) {
            return Err(StorageError::ConstraintViolation(format!(
                "user {} is already in chat {}",
                user_id, chat_id
            )));
        }
        Ok(())
    }

    async fn delete_chat(&self, chat_id: ChatId) -> Result<(), StorageError> {
        let mut chats = self.chats.write().await;
        chats.members.remove(&chat_id);
        chats.messages.remove(&chat_id);
        Ok(())
    }
}

/// Identity collaborator backed by fixed token and profile maps
#[derive(Default)]
pub struct MemoryIdentity {
    sessions: SyncRwLock<HashMap<String, UserId>>,
    profiles: SyncRwLock<HashMap<UserId, UserProfile>>,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, profile: UserProfile) -> Self {
        self.insert_user(profile);
        self
    }

    pub fn with_session(self, token: impl Into<String>, user_id: UserId) -> Self {
        self.insert_session(token, user_id);
        self
    }

    pub fn insert_user(&self, profile: UserProfile) {
        self.profiles.write().insert(profile.user_id, profile);
    }

    pub fn insert_session(&self, token: impl Into<String>, user_id: UserId) {
        self.sessions.write().insert(token.into(), user_id);
    }

    pub fn revoke_session(&self, token: &str) {
        self.sessions.write().remove(token);
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn resolve_session(&self, credential: &str) -> Result<UserId, IdentityError> {
        self.sessions
            .read()
            .get(credential)
            .copied()
            .ok_or(IdentityError::InvalidCredential)
    }

    async fn public_profile(&self, user_id: UserId) -> Result<UserProfile, IdentityError> {
        self.profiles
            .read()
            .get(&user_id)
            .cloned()
            .ok_or(IdentityError::UnknownUser(user_id))
    }
}
