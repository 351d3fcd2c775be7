//! Message fan-out - persist one inbound message and forward it to online participants

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::application::errors::{DeliveryError, FanoutError};
use crate::application::presence::{ConnectionHandle, OutboundFrame, PresenceRegistry};
use crate::application::services::ConversationDirectory;
use crate::domain::entities::{InboundFrame, MessageId, NewMessage, OutboundEvent, UserId};
use crate::domain::traits::MessageStore;

/// How a message is handed to a recipient's outbound queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Never wait: a full queue drops the delivery
    Drop,
    /// Wait up to the bound on a background task, then drop
    BoundedWait(Duration),
}

/// Result of a successful fan-out, reported to the sending session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutReceipt {
    pub message_id: MessageId,
    pub created_at: DateTime<Utc>,
    /// Online participants a delivery was dispatched to
    pub recipients: usize,
}

/// Persists inbound chat messages and forwards them to online participants
pub struct FanoutCoordinator {
    store: Arc<dyn MessageStore>,
    directory: Arc<ConversationDirectory>,
    registry: Arc<PresenceRegistry>,
    policy: DeliveryPolicy,
    slow_consumer_drops: u64,
}

impl FanoutCoordinator {
    pub fn new(
        store: Arc<dyn MessageStore>,
        directory: Arc<ConversationDirectory>,
        registry: Arc<PresenceRegistry>,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            store,
            directory,
            registry,
            policy,
            slow_consumer_drops: 0,
        }
    }

    /// Evict a recipient once it has refused this many deliveries (0 disables)
    pub fn with_slow_consumer_limit(mut self, drops: u64) -> Self {
        self.slow_consumer_drops = drops;
        self
    }

    pub fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    /// Persist a message from `sender_id` and deliver it to every other
    /// online participant of its chat.
    ///
    /// Nothing is delivered unless the store accepted the message. Delivery
    /// failures are absorbed here and never reach the sender.
    pub async fn dispatch(
        &self,
        sender_id: UserId,
        frame: InboundFrame,
    ) -> Result<FanoutReceipt, FanoutError> {
        let draft = NewMessage::stamp(sender_id, frame);

        let message_id = self.store.create_message(&draft).await.map_err(|e| {
            tracing::warn!("Failed to persist message from {} to chat {}: {}", sender_id, draft.chat_id, e);
            FanoutError::PersistFailed(e)
        })?;
        let message = draft.persisted(message_id);
        let created_at = message.created_at;

        let participants = self
            .directory
            .list_participants(message.chat_id)
            .await
            .map_err(|source| {
                tracing::warn!("Failed to resolve participants of chat {}: {}", message.chat_id, source);
                FanoutError::ResolveFailed { message_id, source }
            })?;

        let chat_id = message.chat_id;
        let frame: OutboundFrame = match OutboundEvent::Message(message).to_json() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                tracing::error!("Failed to serialize message {}: {}", message_id, e);
                return Ok(FanoutReceipt { message_id, created_at, recipients: 0 });
            }
        };

        let mut recipients = 0;
        for participant in participants.into_iter().filter(|p| *p != sender_id) {
            // Offline participants catch up through the history read path
            let Some(handle) = self.registry.get(participant) else {
                continue;
            };
            recipients += 1;
            self.deliver(handle, Arc::clone(&frame));
        }

        tracing::debug!("Message {} in chat {} fanned out to {} recipients", message_id, chat_id, recipients);
        Ok(FanoutReceipt { message_id, created_at, recipients })
    }

    fn deliver(&self, handle: Arc<ConnectionHandle>, frame: OutboundFrame) {
        let limit = self.slow_consumer_drops;
        match self.policy {
            DeliveryPolicy::Drop => {
                if let Err(e) = handle.try_deliver(frame) {
                    delivery_failed(&handle, e, limit);
                }
            }
            DeliveryPolicy::BoundedWait(timeout) => match handle.enqueue_in_order(frame, timeout) {
                Ok(false) => {}
                // One drainer per backlog keeps this recipient's frames in order
                Ok(true) => {
                    tokio::spawn(async move {
                        handle
                            .drain_backlog(|e| delivery_failed(&handle, e, limit))
                            .await;
                    });
                }
                Err(e) => delivery_failed(&handle, e, limit),
            },
        }
    }
}

fn delivery_failed(handle: &ConnectionHandle, err: DeliveryError, limit: u64) {
    tracing::debug!("Dropped delivery to user {} ({}): {}", handle.user_id(), handle.id(), err);
    if err == DeliveryError::Closed || limit == 0 {
        return;
    }
    let drops = handle.drop_count();
    if drops >= limit && !handle.is_evicted() {
        tracing::warn!("Evicting slow consumer {} after {} dropped deliveries", handle.user_id(), drops);
        handle.evict();
    }
}
