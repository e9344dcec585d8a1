//! handreceipt-core - Offline-first custody transfer sync engine
//!
//! This crate contains the models, durable queues, QR token verifier and
//! sync orchestration shared by every HandReceipt client.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod network;
pub mod services;
pub mod sync;
pub mod util;
pub mod verifier;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use models::{QueuedTransfer, ScanResult, SyncState, Transfer, TransferId, TransferStatus};
