//! Read-receipt persistence.
//!
//! One call processes a whole batch inside a single transaction: receipt
//! upserts, per-message read counters, and the reader's unread reset either
//! all land or none do.

use std::collections::HashSet;

use chrono::Utc;
use permit_core::{MessageId, ThreadId, UserId};
use rusqlite::params;
use tracing::{debug, instrument};

use crate::database::Database;
use crate::error::StoreError;

/// Repository for `message_receipts`.
#[derive(Clone)]
pub struct ReceiptRepo {
    db: Database,
}

impl ReceiptRepo {
    /// Wrap a database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record that `user_id` read `message_ids` in `thread_id`.
    ///
    /// Malformed and repeated ids are skipped. Ids that name no message in
    /// `thread_id` leave no receipt behind. A message's `read_count` only
    /// moves when this reader had no receipt for it yet. The reader's unread
    /// counter for the thread is zeroed. Returns the number of distinct,
    /// well-formed ids processed.
    #[instrument(skip(self, message_ids), fields(thread_id = %thread_id, user_id = %user_id, batch = message_ids.len()))]
    pub fn process_receipts(
        &self,
        thread_id: &ThreadId,
        user_id: &UserId,
        message_ids: &[String],
        is_realtime: bool,
    ) -> Result<usize, StoreError> {
        let ids = distinct_valid_ids(message_ids);
        let now = Utc::now().to_rfc3339();
        let thread = thread_id.to_string();
        let user = user_id.to_string();

        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut first_reads = 0usize;
            {
                let mut insert = tx.prepare_cached(
                    "INSERT INTO message_receipts (message_id, user_id, read_at, is_realtime)
                     SELECT ?1, ?2, ?3, ?4
                     WHERE EXISTS (SELECT 1 FROM messages WHERE id = ?1 AND thread_id = ?5)
                     ON CONFLICT(message_id, user_id) DO NOTHING",
                )?;
                let mut refresh = tx.prepare_cached(
                    "UPDATE message_receipts SET read_at = ?3, is_realtime = ?4
                     WHERE message_id = ?1 AND user_id = ?2",
                )?;
                let mut bump = tx.prepare_cached(
                    "UPDATE messages SET read_count = read_count + 1 WHERE id = ?1",
                )?;

                for id in &ids {
                    let message = id.to_string();
                    let inserted =
                        insert.execute(params![message, user, now, is_realtime, thread])?;
                    if inserted == 1 {
                        first_reads += 1;
                        let _ = bump.execute(params![message])?;
                    } else {
                        let _ = refresh.execute(params![message, user, now, is_realtime])?;
                    }
                }
            }

            let _ = tx.execute(
                "INSERT INTO thread_participants (thread_id, user_id, unread_count, last_read_at)
                 VALUES (?1, ?2, 0, ?3)
                 ON CONFLICT(thread_id, user_id)
                 DO UPDATE SET unread_count = 0, last_read_at = excluded.last_read_at",
                params![thread, user, now],
            )?;

            tx.commit()?;
            debug!(processed = ids.len(), first_reads, "receipts committed");
            Ok(ids.len())
        })
    }
}

/// Keep the first occurrence of each well-formed id, in input order.
fn distinct_valid_ids(raw: &[String]) -> Vec<MessageId> {
    let mut seen = HashSet::with_capacity(raw.len());
    raw.iter()
        .filter_map(|s| match MessageId::parse(s) {
            Ok(id) => Some(id),
            Err(e) => {
                debug!(error = %e, "skipping malformed message id");
                None
            }
        })
        .filter(|id| seen.insert(*id))
        .collect()
}
