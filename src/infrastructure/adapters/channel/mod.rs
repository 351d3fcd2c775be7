//! In-process channel transport for local development and tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::application::errors::TransportError;
use crate::domain::traits::Transport;

type Inbound = Result<Vec<u8>, TransportError>;

/// Server side of an in-process connection
pub struct ChannelTransport {
    inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::UnboundedSender<String>,
    closes: Arc<AtomicUsize>,
}

/// Client side of an in-process connection
pub struct ChannelPeer {
    to_server: Option<mpsc::Sender<Inbound>>,
    from_server: Option<mpsc::UnboundedReceiver<String>>,
    closes: Arc<AtomicUsize>,
}

/// Create a connected transport/peer pair
pub fn pair() -> (ChannelTransport, ChannelPeer) {
    let (to_server, inbound) = mpsc::channel(64);
    let (outbound, from_server) = mpsc::unbounded_channel();
    let closes = Arc::new(AtomicUsize::new(0));

    let transport = ChannelTransport {
        inbound,
        outbound,
        closes: Arc::clone(&closes),
    };
    let peer = ChannelPeer {
        to_server: Some(to_server),
        from_server: Some(from_server),
        closes,
    };
    (transport, peer)
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.inbound.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        self.outbound
            .send(frame.to_string())
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        let _ = self.closes.fetch_add(1, Ordering::SeqCst);
        self.inbound.close();
    }
}

impl ChannelPeer {
    /// Send a raw text frame
    pub async fn send_raw(&self, text: &str) {
        self.push(Ok(text.as_bytes().to_vec())).await;
    }

    pub async fn send_json(&self, value: serde_json::Value) {
        self.send_raw(&value.to_string()).await;
    }

    /// Make the server's pending read fail
    pub async fn fail(&self, err: TransportError) {
        self.push(Err(err)).await;
    }

    async fn push(&self, item: Inbound) {
        if let Some(tx) = &self.to_server {
            if tx.send(item).await.is_err() {
                tracing::debug!("Channel peer: server side already closed");
            }
        }
    }

    /// Close the client side; the server reads end-of-stream
    pub fn disconnect(&mut self) {
        self.to_server = None;
    }

    /// Stop accepting frames; the server's next write fails
    pub fn stop_reading(&mut self) {
        self.from_server = None;
    }

    /// Next event written by the server, parsed as JSON
    pub async fn next_event(&mut self, wait: Duration) -> Option<serde_json::Value> {
        let rx = self.from_server.as_mut()?;
        let text = tokio::time::timeout(wait, rx.recv()).await.ok()??;
        serde_json::from_str(&text).ok()
    }

    /// How many times the server closed this connection
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}
