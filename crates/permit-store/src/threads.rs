//! Thread participants and message counters.
//!
//! Writing chat content belongs to the wider backend. This repo keeps only
//! the rows the receipt path reads and resets.

use chrono::Utc;
use permit_core::{MessageId, ThreadId, UserId};
use rusqlite::{OptionalExtension, params};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// Repository for `messages` and `thread_participants`.
#[derive(Clone)]
pub struct ThreadRepo {
    db: Database,
}

impl ThreadRepo {
    /// Wrap a database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Ensure `user_id` participates in `thread_id`.
    #[instrument(skip(self), fields(thread_id = %thread_id, user_id = %user_id))]
    pub fn add_participant(&self, thread_id: &ThreadId, user_id: &UserId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO thread_participants (thread_id, user_id) VALUES (?1, ?2)
                 ON CONFLICT(thread_id, user_id) DO NOTHING",
                params![thread_id.to_string(), user_id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Insert a message and bump unread counters for every other participant.
    #[instrument(skip(self), fields(thread_id = %thread_id, sender_id = %sender_id))]
    pub fn record_message(
        &self,
        thread_id: &ThreadId,
        sender_id: &UserId,
    ) -> Result<MessageId, StoreError> {
        let id = MessageId::new();
        let thread = thread_id.to_string();
        let sender = sender_id.to_string();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let _ = tx.execute(
                "INSERT INTO messages (id, thread_id, sender_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), thread, sender, now],
            )?;
            let _ = tx.execute(
                "INSERT INTO thread_participants (thread_id, user_id) VALUES (?1, ?2)
                 ON CONFLICT(thread_id, user_id) DO NOTHING",
                params![thread, sender],
            )?;
            let _ = tx.execute(
                "UPDATE thread_participants SET unread_count = unread_count + 1
                 WHERE thread_id = ?1 AND user_id != ?2",
                params![thread, sender],
            )?;
            tx.commit()?;
            Ok(id)
        })
    }

    /// Unread messages for one participant.
    pub fn unread_count(&self, thread_id: &ThreadId, user_id: &UserId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT unread_count FROM thread_participants WHERE thread_id = ?1 AND user_id = ?2",
                params![thread_id.to_string(), user_id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("participant {user_id} in thread {thread_id}")))
        })
    }

    /// When the participant last cleared the thread, if ever.
    pub fn last_read_at(
        &self,
        thread_id: &ThreadId,
        user_id: &UserId,
    ) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT last_read_at FROM thread_participants WHERE thread_id = ?1 AND user_id = ?2",
                params![thread_id.to_string(), user_id.to_string()],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("participant {user_id} in thread {thread_id}")))
        })
    }

    /// Distinct readers recorded for a message.
    pub fn read_count(&self, message_id: &MessageId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT read_count FROM messages WHERE id = ?1",
                [message_id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))
        })
    }
}
