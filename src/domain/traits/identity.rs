use async_trait::async_trait;

use crate::application::errors::IdentityError;
use crate::domain::entities::{UserId, UserProfile};

/// Identity collaborator - resolves credentials and serves public profiles
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a session credential to the user it belongs to
    async fn resolve_session(&self, credential: &str) -> Result<UserId, IdentityError>;

    /// Public profile of a user
    async fn public_profile(&self, user_id: UserId) -> Result<UserProfile, IdentityError>;
}
