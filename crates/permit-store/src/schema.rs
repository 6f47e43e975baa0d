//! Receipt database schema, applied as ordered migrations.
//!
//! The applied version lives in `PRAGMA user_version`. Each pending
//! migration runs in its own transaction together with the version bump.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StoreError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "messages, receipts, participants",
        sql: r"
CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    read_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE message_receipts (
    message_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    read_at TEXT NOT NULL,
    is_realtime INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (message_id, user_id)
);

CREATE TABLE thread_participants (
    thread_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    unread_count INTEGER NOT NULL DEFAULT 0,
    last_read_at TEXT,
    PRIMARY KEY (thread_id, user_id)
);

CREATE INDEX idx_messages_thread ON messages(thread_id);
",
    },
    Migration {
        version: 2,
        description: "receipt lookup by reader",
        sql: "CREATE INDEX idx_receipts_user ON message_receipts(user_id);",
    },
];

/// Connection-level settings, applied before migrating.
pub const PRAGMAS: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
";

/// Newest schema version this build knows.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Schema version recorded in the database file.
pub fn current_version(conn: &Connection) -> Result<u32, StoreError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Apply every migration newer than the recorded version. Returns how many
/// ran.
pub fn migrate(conn: &Connection) -> Result<usize, StoreError> {
    let current = current_version(conn)?;
    if current > latest_version() {
        return Err(StoreError::Database(format!(
            "database schema v{current} is newer than this build (v{})",
            latest_version()
        )));
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();
    for migration in &pending {
        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql).map_err(|e| {
            StoreError::Database(format!("migration v{} failed: {e}", migration.version))
        })?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
    }
    if pending.is_empty() {
        debug!(version = current, "schema up to date");
    }
    Ok(pending.len())
}
