//! WebSocket transport over an upgraded axum connection

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};

use crate::application::errors::TransportError;
use crate::domain::traits::Transport;

pub struct AxumTransport {
    socket: WebSocket,
    closed: bool,
}

impl AxumTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self {
            socket,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for AxumTransport {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            let msg = match self.socket.recv().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(TransportError::Reset(e.to_string())),
                None => return Ok(None),
            };

            match msg {
                Message::Text(text) => return Ok(Some(text.as_str().as_bytes().to_vec())),
                Message::Binary(data) => return Ok(Some(data.to_vec())),
                Message::Close(_) => return Ok(None),
                // axum answers pings itself
                Message::Ping(_) | Message::Pong(_) => continue,
            }
        }
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.socket
            .send(Message::Text(frame.to_owned().into()))
            .await
            .map_err(|e| TransportError::Reset(e.to_string()))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.socket.send(Message::Close(None)).await {
            tracing::debug!("Close frame not sent: {}", e);
        }
    }
}
