//! Read-receipt reconciliation.
//!
//! The dispatcher hands over a thread, a reader, and the raw message ids from
//! a `READ_RECEIPT`. The store does the durable work in one transaction; this
//! layer keeps blocking database calls off the async workers.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use permit_core::{ThreadId, UserId};
use permit_store::{ReceiptRepo, StoreError};
use tracing::{debug, instrument};

use crate::metrics::READ_RECEIPTS_PROCESSED_TOTAL;

/// Durable receipt storage.
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Persist receipts for `message_ids` and reset the reader's unread
    /// counter. Returns how many distinct ids were processed.
    async fn process_receipts(
        &self,
        thread_id: ThreadId,
        user_id: UserId,
        message_ids: Vec<String>,
        is_realtime: bool,
    ) -> Result<usize, StoreError>;
}

#[async_trait]
impl ReceiptStore for ReceiptRepo {
    async fn process_receipts(
        &self,
        thread_id: ThreadId,
        user_id: UserId,
        message_ids: Vec<String>,
        is_realtime: bool,
    ) -> Result<usize, StoreError> {
        let repo = self.clone();
        tokio::task::spawn_blocking(move || {
            repo.process_receipts(&thread_id, &user_id, &message_ids, is_realtime)
        })
        .await
        .map_err(|e| StoreError::Database(format!("receipt task failed: {e}")))?
    }
}

/// Turns live read receipts into stored state.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ReceiptStore>,
}

impl Reconciler {
    /// Wrap a receipt store.
    pub fn new(store: Arc<dyn ReceiptStore>) -> Self {
        Self { store }
    }

    /// Record that `user_id` has read `message_ids` in `thread_id`.
    #[instrument(skip(self, message_ids), fields(thread_id = %thread_id, user_id = %user_id, batch = message_ids.len()))]
    pub async fn reconcile(
        &self,
        thread_id: ThreadId,
        user_id: UserId,
        message_ids: Vec<String>,
    ) -> Result<usize, StoreError> {
        let processed = self
            .store
            .process_receipts(thread_id, user_id, message_ids, true)
            .await?;
        counter!(READ_RECEIPTS_PROCESSED_TOTAL).increment(processed as u64);
        debug!(processed, "read receipts reconciled");
        Ok(processed)
    }
}
