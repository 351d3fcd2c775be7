//! Presence session - one connection from handshake to termination

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::handle::{ConnectionHandle, OutboundFrame};
use super::registry::{ConnectedUser, PresenceRegistry};
use crate::application::errors::TransportError;
use crate::application::services::FanoutCoordinator;
use crate::domain::entities::{InboundFrame, OutboundEvent, UserId};
use crate::domain::traits::Transport;

const BAD_FRAME: &str = "websocket message bad request";

/// Shared collaborators handed to every session
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<PresenceRegistry>,
    pub coordinator: Arc<FanoutCoordinator>,
    /// Outbound queue capacity per connection
    pub queue_capacity: usize,
    /// Server-wide shutdown; every session handle gets a child token
    pub shutdown: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Active,
    Terminated,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    PeerClosed,
    ReadFailed(TransportError),
    WriteFailed(TransportError),
    /// Replaced by a newer connection or evicted as a slow consumer
    Evicted,
    Shutdown,
}

/// Deregisters the session's own registry entry when dropped, including
/// during unwinding.
struct Registration {
    registry: Arc<PresenceRegistry>,
    user_id: UserId,
    connection_id: Uuid,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.registry.remove_connection(self.user_id, self.connection_id) {
            tracing::debug!("User {} deregistered ({})", self.user_id, self.connection_id);
        }
    }
}

/// Control loop owning one authenticated connection
pub struct PresenceSession<T: Transport> {
    user_id: UserId,
    transport: T,
    handle: Arc<ConnectionHandle>,
    outbound: mpsc::Receiver<OutboundFrame>,
    state: SessionState,
    ctx: SessionContext,
}

impl<T: Transport> PresenceSession<T> {
    /// Start a session for a connection whose credential already resolved to `user_id`
    pub fn new(user_id: UserId, transport: T, ctx: SessionContext) -> Self {
        let (handle, outbound) =
            ConnectionHandle::new(user_id, ctx.queue_capacity, ctx.shutdown.child_token());
        Self {
            user_id,
            transport,
            handle,
            outbound,
            state: SessionState::Handshaking,
            ctx,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Register, serve frames until the connection ends, then deregister and close
    pub async fn run(mut self) -> SessionExit {
        let registration = self.activate();
        let exit = self.serve().await;

        drop(registration);
        self.transport.close().await;
        self.transition(SessionState::Terminated);
        tracing::info!("Session for user {} ended: {:?}", self.user_id, exit);
        exit
    }

    fn activate(&mut self) -> Registration {
        let entry = ConnectedUser::new(Arc::clone(&self.handle));
        if let Some(previous) = self.ctx.registry.add(entry) {
            tracing::info!(
                "User {} reconnected, evicting connection {}",
                self.user_id,
                previous.handle.id()
            );
            previous.handle.evict();
        }
        self.transition(SessionState::Active);

        Registration {
            registry: Arc::clone(&self.ctx.registry),
            user_id: self.user_id,
            connection_id: self.handle.id(),
        }
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!("Session {} ({}): {:?} -> {:?}", self.user_id, self.handle.id(), self.state, next);
        self.state = next;
    }

    async fn serve(&mut self) -> SessionExit {
        loop {
            tokio::select! {
                biased;
                _ = self.handle.evicted() => {
                    return if self.ctx.shutdown.is_cancelled() {
                        SessionExit::Shutdown
                    } else {
                        SessionExit::Evicted
                    };
                }
                Some(frame) = self.outbound.recv() => {
                    if let Err(e) = self.transport.send(&frame).await {
                        return SessionExit::WriteFailed(e);
                    }
                }
                inbound = self.transport.recv() => match inbound {
                    Ok(Some(raw)) => {
                        if let Err(e) = self.process(&raw).await {
                            return SessionExit::WriteFailed(e);
                        }
                    }
                    Ok(None) => return SessionExit::PeerClosed,
                    Err(e) => return SessionExit::ReadFailed(e),
                }
            }
        }
    }

    /// Handle one inbound frame. Only a failed write to our own connection is fatal.
    async fn process(&mut self, raw: &[u8]) -> Result<(), TransportError> {
        let frame = match InboundFrame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("Bad frame from user {}: {}", self.user_id, e);
                return self.reply_error(BAD_FRAME).await;
            }
        };

        match self.ctx.coordinator.dispatch(self.user_id, frame).await {
            Ok(receipt) => {
                tracing::debug!("User {} sent message {}", self.user_id, receipt.message_id);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Message from user {} not delivered: {}", self.user_id, e);
                self.reply_error(e.client_message()).await
            }
        }
    }

    async fn reply_error(&mut self, text: &str) -> Result<(), TransportError> {
        let json = OutboundEvent::error(text)
            .to_json()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.transport.send(&json).await
    }
}
