//! Infrastructure layer - External concerns
//! 
//! This layer contains:
//! - Config: Configuration loading
//! - Database: SQLite message store and sessions
//! - Storage: In-memory store and identity
//! - Adapters: Transports (WebSocket, in-process channel) and the HTTP router

pub mod adapters;
pub mod config;
pub mod database;
pub mod storage;
