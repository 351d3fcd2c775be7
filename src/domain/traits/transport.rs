use async_trait::async_trait;

use crate::application::errors::TransportError;

/// One physical bidirectional connection carrying framed messages
///
/// Owned by exactly one presence session. `recv` must be cancel safe: the
/// session races it against its outbound queue and its shutdown signal.
#[async_trait]
pub trait Transport: Send {
    /// Wait for the next inbound frame. `Ok(None)` means the peer closed.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Write one text frame
    async fn send(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Close the connection. Called once, by the owning session.
    async fn close(&mut self);
}
