//! # permit-store
//!
//! Durable side of read-receipt reconciliation, on `SQLite`.

#![deny(unsafe_code)]

pub mod database;
pub mod error;
pub mod receipts;
pub mod schema;
pub mod threads;

pub use database::Database;
pub use error::StoreError;
pub use receipts::ReceiptRepo;
pub use threads::ThreadRepo;
