//! Application layer - presence engine and chat services
//! 
//! This layer contains:
//! - Presence: connection handles, the online registry and per-connection sessions
//! - Services: message fan-out and the conversation directory
//! - Errors: domain-specific errors

pub mod errors;
pub mod presence;
pub mod services;
