//! # permit-realtime
//!
//! Live messaging for permit application threads.
//!
//! - Admission: cookie credential + `threadId` query parameter, checked before upgrade
//! - Hub: one control task owns the live client set; register, unregister,
//!   and broadcast requests arrive over a channel
//! - Client actors: bounded outbound queue, thread subscriptions, inbound
//!   and outbound loops with idle deadline and keepalive pings
//! - Dispatcher: typing, read receipts, presence, chat acknowledgments
//! - Reconciler: read receipts into durable counters
//! - Slow consumers are shed rather than allowed to block a broadcaster

#![deny(unsafe_code)]

pub mod admission;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod reconciler;
pub mod server;
pub mod shutdown;

pub use admission::{Admission, AdmissionError, JwtValidator, TokenError, TokenValidator};
pub use client::{Client, EnqueueError, OutboundQueue};
pub use config::{ConnectionConfig, ServerConfig};
pub use dispatcher::{DispatchError, Dispatcher};
pub use hub::{Hub, HubError, HubHandle};
pub use reconciler::{ReceiptStore, Reconciler};
pub use server::{AppState, RealtimeServer};
pub use shutdown::ShutdownCoordinator;
