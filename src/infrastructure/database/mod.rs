//! SQLite-backed message store and identity collaborator

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::application::errors::{ChatError, IdentityError, StorageError};
use crate::domain::entities::{ChatId, ChatMessage, MessageId, NewMessage, UserId, UserProfile};
use crate::domain::traits::{IdentityProvider, MessageStore};
use crate::infrastructure::config::{session_expiry, DatabaseConfig};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        user_id INTEGER PRIMARY KEY,
        user_name TEXT,
        nick_name TEXT NOT NULL,
        description TEXT,
        avatar_url TEXT
    );
    CREATE TABLE IF NOT EXISTS sessions (
        token TEXT PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
        expires_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS chat (
        chat_id INTEGER PRIMARY KEY AUTOINCREMENT
    );
    CREATE TABLE IF NOT EXISTS user_chat (
        chat_id INTEGER NOT NULL REFERENCES chat(chat_id) ON DELETE CASCADE,
        user_id INTEGER NOT NULL,
        PRIMARY KEY (chat_id, user_id)
    );
    CREATE INDEX IF NOT EXISTS idx_user_chat_user ON user_chat(user_id);
    CREATE TABLE IF NOT EXISTS msg (
        message_id INTEGER PRIMARY KEY AUTOINCREMENT,
        chat_id INTEGER NOT NULL REFERENCES chat(chat_id) ON DELETE CASCADE,
        author_id INTEGER NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_msg_chat ON msg(chat_id);
";

fn to_sql_id(id: u64) -> i64 {
    id as i64
}

fn from_sql_id(id: i64) -> u64 {
    id as u64
}

fn chat_exists(conn: &Connection, chat_id: ChatId) -> Result<bool, StorageError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM chat WHERE chat_id = ?1",
            [to_sql_id(chat_id)],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())?;
        tracing::debug!("Opened database at {}", path.as_ref().display());
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open the configured database and register its seed sessions
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self, ChatError> {
        let store = if config.in_memory {
            Self::in_memory()?
        } else {
            Self::open(&config.path)?
        };

        if !config.seed.is_empty() {
            let expires_at = session_expiry(config.session_ttl_hours)?;
            for seed in &config.seed {
                store
                    .upsert_user(&UserProfile::new(seed.user_id, seed.nick_name.clone()))
                    .await?;
                store.create_session(&seed.token, seed.user_id, expires_at).await?;
            }
            tracing::info!("Seeded {} sessions", config.seed.len());
        }
        Ok(store)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> T + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut *guard)
        })
        .await
        .map_err(|e| StorageError::Unavailable(format!("database task failed: {}", e)))
    }

    /// Insert or replace a public profile
    pub async fn upsert_user(&self, profile: &UserProfile) -> Result<(), StorageError> {
        let profile = profile.clone();
        self.with_conn(move |conn| -> Result<(), StorageError> {
            conn.execute(
                "INSERT OR REPLACE INTO users (user_id, user_name, nick_name, description, avatar_url)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    to_sql_id(profile.user_id),
                    profile.user_name,
                    profile.nick_name,
                    profile.description,
                    profile.avatar_url
                ],
            )?;
            Ok(())
        })
        .await?
    }

    /// Register a session token for a user
    pub async fn create_session(
        &self,
        token: &str,
        user_id: UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let token = token.to_string();
        self.with_conn(move |conn| -> Result<(), StorageError> {
            conn.execute(
                "INSERT OR REPLACE INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
                params![token, to_sql_id(user_id), expires_at],
            )?;
            Ok(())
        })
        .await?
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn create_message(&self, message: &NewMessage) -> Result<MessageId, StorageError> {
        let message = message.clone();
        self.with_conn(move |conn| -> Result<MessageId, StorageError> {
            let tx = conn.transaction()?;
            if !chat_exists(&tx, message.chat_id)? {
                return Err(StorageError::ConstraintViolation(format!(
                    "chat {} does not exist",
                    message.chat_id
                )));
            }
            let member = tx
                .query_row(
                    "SELECT 1 FROM user_chat WHERE chat_id = ?1 AND user_id = ?2",
                    params![to_sql_id(message.chat_id), to_sql_id(message.sender_id)],
                    |_| Ok(()),
                )
                .optional()?;
            if member.is_none() {
                return Err(StorageError::ConstraintViolation(format!(
                    "user {} is not a member of chat {}",
                    message.sender_id, message.chat_id
                )));
            }

            tx.execute(
                "INSERT INTO msg (chat_id, author_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    to_sql_id(message.chat_id),
                    to_sql_id(message.sender_id),
                    message.content,
                    message.created_at
                ],
            )?;
            let message_id = from_sql_id(tx.last_insert_rowid());
            tx.commit()?;
            Ok(message_id)
        })
        .await?
    }

    async fn get_chat_messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>, StorageError> {
        self.with_conn(move |conn| -> Result<Vec<ChatMessage>, StorageError> {
            if !chat_exists(conn, chat_id)? {
                return Err(StorageError::NotFound(format!("chat {}", chat_id)));
            }
            let mut stmt = conn.prepare(
                "SELECT message_id, chat_id, author_id, content, created_at
                 FROM msg WHERE chat_id = ?1 ORDER BY message_id",
            )?;
            let rows = stmt.query_map([to_sql_id(chat_id)], |row| {
                Ok(ChatMessage {
                    message_id: from_sql_id(row.get(0)?),
                    chat_id: from_sql_id(row.get(1)?),
                    sender_id: from_sql_id(row.get(2)?),
                    content: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?;

            let mut messages = Vec::new();
            for message in rows {
                messages.push(message?);
            }
            Ok(messages)
        })
        .await?
    }

    async fn get_chat_users(&self, chat_id: ChatId) -> Result<BTreeSet<UserId>, StorageError> {
        self.with_conn(move |conn| -> Result<BTreeSet<UserId>, StorageError> {
            if !chat_exists(conn, chat_id)? {
                return Err(StorageError::NotFound(format!("chat {}", chat_id)));
            }
            let mut stmt = conn.prepare("SELECT user_id FROM user_chat WHERE chat_id = ?1")?;
            let rows = stmt.query_map([to_sql_id(chat_id)], |row| row.get::<_, i64>(0))?;

            let mut users = BTreeSet::new();
            for user in rows {
                users.insert(from_sql_id(user?));
            }
            Ok(users)
        })
        .await?
    }

    async fn get_user_chats(&self, user_id: UserId) -> Result<Vec<ChatId>, StorageError> {
        self.with_conn(move |conn| -> Result<Vec<ChatId>, StorageError> {
            let mut stmt =
                conn.prepare("SELECT chat_id FROM user_chat WHERE user_id = ?1 ORDER BY chat_id")?;
            let rows = stmt.query_map([to_sql_id(user_id)], |row| row.get::<_, i64>(0))?;

            let mut chats = Vec::new();
            for chat in rows {
                chats.push(from_sql_id(chat?));
            }
            Ok(chats)
        })
        .await?
    }

    async fn create_chat(&self) -> Result<ChatId, StorageError> {
        self.with_conn(|conn| -> Result<ChatId, StorageError> {
            conn.execute("INSERT INTO chat DEFAULT VALUES", [])?;
            Ok(from_sql_id(conn.last_insert_rowid()))
        })
        .await?
    }

    async fn add_user_to_chat(&self, chat_id: ChatId, user_id: UserId) -> Result<(), StorageError> {
        self.with_conn(move |conn| -> Result<(), StorageError> {
            conn.execute(
                "INSERT INTO user_chat (chat_id, user_id) VALUES (?1, ?2)",
                params![to_sql_id(chat_id), to_sql_id(user_id)],
            )?;
            Ok(())
        })
        .await?
    }

    async fn delete_chat(&self, chat_id: ChatId) -> Result<(), StorageError> {
        self.with_conn(move |conn| -> Result<(), StorageError> {
            conn.execute("DELETE FROM chat WHERE chat_id = ?1", [to_sql_id(chat_id)])?;
            Ok(())
        })
        .await?
    }
}

#[async_trait]
impl IdentityProvider for SqliteStore {
    async fn resolve_session(&self, credential: &str) -> Result<UserId, IdentityError> {
        let token = credential.to_string();
        let row = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT user_id, expires_at FROM sessions WHERE token = ?1",
                    [token],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, DateTime<Utc>>(1)?)),
                )
                .optional()
            })
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        let (user_id, expires_at) = row.ok_or(IdentityError::InvalidCredential)?;
        if expires_at <= Utc::now() {
            return Err(IdentityError::Expired);
        }
        Ok(from_sql_id(user_id))
    }

    async fn public_profile(&self, user_id: UserId) -> Result<UserProfile, IdentityError> {
        let profile = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT user_name, nick_name, description, avatar_url FROM users WHERE user_id = ?1",
                    [to_sql_id(user_id)],
                    |row| {
                        Ok(UserProfile {
                            user_id,
                            user_name: row.get(0)?,
                            nick_name: row.get(1)?,
                            description: row.get(2)?,
                            avatar_url: row.get(3)?,
                        })
                    },
                )
                .optional()
            })
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        profile.ok_or(IdentityError::UnknownUser(user_id))
    }
}
