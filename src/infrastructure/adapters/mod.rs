//! Transport adapters

pub mod channel;
pub mod http;
pub mod websocket;

pub use http::{router, AppState};
pub use websocket::AxumTransport;
