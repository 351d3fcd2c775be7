//! Domain entities - Core chat objects

pub mod user;
pub mod message;
pub mod chat;

pub use user::{UserId, UserProfile};
pub use message::{ChatMessage, InboundFrame, MessageId, NewMessage, OutboundEvent};
pub use chat::{ChatId, ChatSummary};
