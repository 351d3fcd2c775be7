//! Online presence registry - which users hold a live connection

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use super::handle::ConnectionHandle;
use crate::domain::entities::UserId;

/// A user together with the connection currently representing them
#[derive(Debug, Clone)]
pub struct ConnectedUser {
    pub user_id: UserId,
    pub handle: Arc<ConnectionHandle>,
}

impl ConnectedUser {
    pub fn new(handle: Arc<ConnectionHandle>) -> Self {
        Self {
            user_id: handle.user_id(),
            handle,
        }
    }
}

/// Registry of online users.
///
/// Callers only ever get cloned `Arc` handles back; the map itself never
/// leaves the lock.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    users: RwLock<HashMap<UserId, ConnectedUser>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the entry for the handle's user.
    /// Returns the entry that was replaced, if any.
    pub fn add(&self, user: ConnectedUser) -> Option<ConnectedUser> {
        let previous = self.users.write().insert(user.user_id, user);
        if let Some(ref prev) = previous {
            tracing::debug!("Replaced connection {} for user {}", prev.handle.id(), prev.user_id);
        }
        previous
    }

    /// Remove the entry for a user; no-op when absent
    pub fn remove(&self, user_id: UserId) -> Option<ConnectedUser> {
        self.users.write().remove(&user_id)
    }

    /// Remove the entry only if it still belongs to the given connection
    pub fn remove_connection(&self, user_id: UserId, connection_id: Uuid) -> bool {
        let mut users = self.users.write();
        match users.get(&user_id) {
            Some(entry) if entry.handle.id() == connection_id => {
                users.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, user_id: UserId) -> Option<Arc<ConnectionHandle>> {
        self.users.read().get(&user_id).map(|u| Arc::clone(&u.handle))
    }

    pub fn is_present(&self, user_id: UserId) -> bool {
        self.users.read().contains_key(&user_id)
    }

    /// Number of online users
    pub fn count(&self) -> usize {
        self.users.read().len()
    }

    /// Ids of all online users
    pub fn online_users(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.users.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
