use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque user identifier, resolved by the identity collaborator
pub type UserId = u64;

/// Public profile of a user, shown as the companion of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub user_name: Option<String>,
    pub nick_name: String,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
}

impl UserProfile {
    pub fn new(user_id: UserId, nick_name: impl Into<String>) -> Self {
        Self {
            user_id,
            user_name: None,
            nick_name: nick_name.into(),
            description: None,
            avatar_url: None,
        }
    }

    pub fn with_user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.user_name.as_deref().unwrap_or(&self.nick_name)
    }
}

impl fmt::Display for UserProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_user_name() {
        let profile = UserProfile::new(7, "nick");
        assert_eq!(profile.display_name(), "nick");

        let profile = profile.with_user_name("Real Name");
        assert_eq!(profile.to_string(), "Real Name");
    }
}
