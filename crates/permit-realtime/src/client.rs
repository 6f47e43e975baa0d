//! Per-connection client state.
//!
//! A [`Client`] is shared between its connection task, the hub, and the
//! dispatcher. Everything here is safe to touch from any of them: the queue
//! sender sits behind a mutex so it can be taken exactly once, and the
//! subscription set behind a read-write lock.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use permit_core::{ClientId, Envelope, ThreadId, UserId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Receiving half of a client's outbound queue, drained by its writer.
pub type OutboundQueue = mpsc::Receiver<Arc<Envelope>>;

/// Why an envelope could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    /// The queue is at capacity.
    #[error("outbound queue full")]
    Full,
    /// The queue was already closed.
    #[error("outbound queue closed")]
    Closed,
}

/// One live connection.
pub struct Client {
    id: ClientId,
    user_id: UserId,
    queue: Mutex<Option<mpsc::Sender<Arc<Envelope>>>>,
    closed: AtomicBool,
    subscriptions: RwLock<HashSet<ThreadId>>,
    connected_at: Instant,
}

impl Client {
    /// Create a client subscribed to `thread_id`, with a queue of `capacity`.
    pub fn new(user_id: UserId, thread_id: ThreadId, capacity: usize) -> (Arc<Self>, OutboundQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let client = Self {
            id: ClientId::new(),
            user_id,
            queue: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
            subscriptions: RwLock::new(HashSet::from([thread_id])),
            connected_at: Instant::now(),
        };
        (Arc::new(client), rx)
    }

    /// Connection id.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Authenticated user behind this connection.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Queue an envelope without waiting.
    pub fn try_enqueue(&self, envelope: Arc<Envelope>) -> Result<(), EnqueueError> {
        let guard = self.queue.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(EnqueueError::Closed);
        };
        tx.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Queue a reply addressed to this client only.
    pub fn send(&self, envelope: Envelope) -> Result<(), EnqueueError> {
        self.try_enqueue(Arc::new(envelope))
    }

    /// Close the outbound queue.
    ///
    /// Safe to call from any number of places. Returns `true` only for the
    /// call that actually closed it.
    pub fn close_queue(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        drop(self.queue.lock().take());
        true
    }

    /// Whether the outbound queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Add a thread subscription. Returns `false` if already subscribed.
    pub fn subscribe(&self, thread_id: ThreadId) -> bool {
        self.subscriptions.write().insert(thread_id)
    }

    /// Drop a thread subscription. Returns `false` if not subscribed.
    pub fn unsubscribe(&self, thread_id: &ThreadId) -> bool {
        self.subscriptions.write().remove(thread_id)
    }

    /// Whether this client receives traffic for `thread_id`.
    pub fn is_subscribed(&self, thread_id: &ThreadId) -> bool {
        self.subscriptions.read().contains(thread_id)
    }

    /// Snapshot of current subscriptions.
    pub fn subscribed_threads(&self) -> Vec<ThreadId> {
        self.subscriptions.read().iter().copied().collect()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
