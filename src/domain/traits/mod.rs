//! Domain traits - Abstractions for collaborators outside the presence engine

pub mod identity;
pub mod store;
pub mod transport;

pub use identity::IdentityProvider;
pub use store::MessageStore;
pub use transport::Transport;
