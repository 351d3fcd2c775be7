//! Real-time presence and message fan-out for Pinset chats

pub mod application;
pub mod domain;
pub mod infrastructure;
