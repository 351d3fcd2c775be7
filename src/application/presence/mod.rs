//! Presence engine - live connections, who is online, and the per-connection loop

pub mod handle;
pub mod registry;
pub mod session;

pub use handle::{ConnectionHandle, OutboundFrame};
pub use registry::{ConnectedUser, PresenceRegistry};
pub use session::{PresenceSession, SessionContext, SessionExit, SessionState};
