//! Store error type.

/// Errors surfaced by the receipt store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `SQLite` rejected a statement or the transaction failed to commit.
    #[error("database error: {0}")]
    Database(String),

    /// A row that must exist did not.
    #[error("not found: {0}")]
    NotFound(String),

    /// Filesystem failure while opening the database.
    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}
