//! Application services - Fan-out and conversation directory

pub mod directory;
pub mod fanout;

pub use directory::ConversationDirectory;
pub use fanout::{DeliveryPolicy, FanoutCoordinator, FanoutReceipt};
