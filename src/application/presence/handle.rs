//! Connection handle - the send side of one live connection

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::errors::DeliveryError;
use crate::domain::entities::UserId;

/// Serialized outbound frame, shared between all recipients of one event
pub type OutboundFrame = Arc<str>;

/// Shared handle to a connection owned by a presence session.
///
/// Other sessions may only `deliver` into its queue. Draining the queue onto
/// the wire, reading and closing belong to the owning session.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: Uuid,
    user_id: UserId,
    outbound: mpsc::Sender<OutboundFrame>,
    shutdown: CancellationToken,
    drops: AtomicU64,
    backlog: Mutex<Backlog>,
}

/// Frames that found the queue full, oldest first
#[derive(Debug, Default)]
struct Backlog {
    frames: VecDeque<(OutboundFrame, Instant)>,
    draining: bool,
}

impl ConnectionHandle {
    /// Create a handle and the queue receiver its owning session drains.
    /// `shutdown` is usually a child of the server-wide token.
    pub fn new(
        user_id: UserId,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: Uuid::new_v4(),
            user_id,
            outbound: tx,
            shutdown,
            drops: AtomicU64::new(0),
            backlog: Mutex::new(Backlog::default()),
        };
        (Arc::new(handle), rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Queue a frame without waiting
    pub fn try_deliver(&self, frame: OutboundFrame) -> Result<(), DeliveryError> {
        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(self.record_drop(DeliveryError::QueueFull)),
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    /// Queue a frame behind any frames already waiting for capacity.
    ///
    /// Goes straight into the queue when nothing is waiting and there is
    /// room; otherwise the frame joins the backlog with a deadline of
    /// `timeout` from now. Returns `true` when the caller must start
    /// [`drain_backlog`](Self::drain_backlog), which happens once per
    /// non-empty backlog.
    pub fn enqueue_in_order(
        &self,
        frame: OutboundFrame,
        timeout: Duration,
    ) -> Result<bool, DeliveryError> {
        let mut backlog = self.backlog.lock();
        let frame = if backlog.frames.is_empty() {
            match self.outbound.try_send(frame) {
                Ok(()) => return Ok(false),
                Err(TrySendError::Closed(_)) => return Err(DeliveryError::Closed),
                Err(TrySendError::Full(frame)) => frame,
            }
        } else {
            frame
        };

        backlog.frames.push_back((frame, Instant::now() + timeout));
        let start = !backlog.draining;
        backlog.draining = true;
        Ok(start)
    }

    /// Move backlogged frames into the queue in arrival order, giving each
    /// until its own deadline. Frames that miss it are counted as drops and
    /// reported through `on_failure`.
    pub async fn drain_backlog(&self, mut on_failure: impl FnMut(DeliveryError)) {
        loop {
            let (frame, deadline) = {
                let mut backlog = self.backlog.lock();
                match backlog.frames.front() {
                    Some((frame, deadline)) => (Arc::clone(frame), *deadline),
                    None => {
                        backlog.draining = false;
                        return;
                    }
                }
            };

            let wait = deadline.saturating_duration_since(Instant::now());
            let result = self.outbound.send_timeout(frame, wait).await;

            // The frame stays at the front until sent so later deliveries queue behind it
            let mut backlog = self.backlog.lock();
            match result {
                Ok(()) => {
                    backlog.frames.pop_front();
                }
                Err(SendTimeoutError::Timeout(_)) => {
                    backlog.frames.pop_front();
                    drop(backlog);
                    on_failure(self.record_drop(DeliveryError::TimedOut));
                }
                Err(SendTimeoutError::Closed(_)) => {
                    backlog.frames.clear();
                    backlog.draining = false;
                    drop(backlog);
                    on_failure(DeliveryError::Closed);
                    return;
                }
            }
        }
    }

    /// Frames waiting for queue capacity
    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().frames.len()
    }

    fn record_drop(&self, err: DeliveryError) -> DeliveryError {
        let _ = self.drops.fetch_add(1, Ordering::Relaxed);
        err
    }

    /// Total deliveries refused by this handle
    pub fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    /// Ask the owning session to terminate
    pub fn evict(&self) {
        self.shutdown.cancel();
    }

    pub fn is_evicted(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once the handle is evicted or the server shuts down
    pub async fn evicted(&self) {
        self.shutdown.cancelled().await
    }

    /// True once the owning session has dropped its queue receiver
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}
