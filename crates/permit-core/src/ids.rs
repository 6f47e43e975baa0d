//! Branded identifier types.
//!
//! Connection ids are server-minted prefixed strings. User, thread, and
//! message ids are UUIDs owned by the wider backend, so they only parse.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Failure to parse an identifier from untrusted input.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input was empty or whitespace.
    #[error("{0} is empty")]
    Empty(&'static str),
    /// The input was not a well-formed UUID.
    #[error("{kind} is not a valid identifier: {raw}")]
    Malformed {
        /// Which identifier was being parsed.
        kind: &'static str,
        /// The offending input.
        raw: String,
    },
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh, time-ordered id.
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            /// Borrow the raw string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a random id. Used by tests and by collaborators that
            /// mint rows locally.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse untrusted input, rejecting anything that is not a UUID.
            pub fn parse(raw: &str) -> Result<Self, IdError> {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Err(IdError::Empty($kind));
                }
                Uuid::parse_str(trimmed)
                    .map(Self)
                    .map_err(|_| IdError::Malformed {
                        kind: $kind,
                        raw: raw.to_owned(),
                    })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0.hyphenated(), f)
            }
        }

        impl FromStr for $name {
            type Err = IdError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

branded_id!(
    /// Identifier of one live connection.
    ClientId,
    "client"
);

uuid_id!(
    /// Authenticated principal that owns connections.
    UserId,
    "user id"
);
uuid_id!(
    /// Conversation scope that connections subscribe to.
    ThreadId,
    "thread id"
);
uuid_id!(
    /// A persisted chat message.
    MessageId,
    "message id"
);
