//! # permit-core
//!
//! Foundation types shared by every permit crate.
//!
//! - Branded identifiers for clients, users, threads, and messages
//! - The [`Envelope`] wire message exchanged over live connections
//! - `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod envelope;
pub mod ids;
pub mod logging;

pub use envelope::{Envelope, EnvelopeError, EnvelopeKind};
pub use ids::{ClientId, IdError, MessageId, ThreadId, UserId};
