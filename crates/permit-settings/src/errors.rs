//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be produced.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// The settings file is not valid JSON, or a key has the wrong type.
    #[error("malformed settings in {}: {source}", path.display())]
    Malformed {
        /// File that failed.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },
    /// A loaded value the daemon cannot start with.
    #[error("{field}: {reason}")]
    Invalid {
        /// Dotted camelCase key, as written in the settings file.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::Invalid { field, reason }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
