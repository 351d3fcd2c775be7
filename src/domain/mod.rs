//! Domain layer - Core chat types with no transport or storage dependencies
//! 
//! This layer contains:
//! - Entities: Users, chat messages, wire frames and conversation summaries
//! - Traits: Abstractions for collaborators (MessageStore, IdentityProvider, Transport)

pub mod entities;
pub mod traits;
