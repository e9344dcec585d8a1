//! Error types for handreceipt-core

use thiserror::Error;

use crate::models::SyncState;

/// Result type alias using handreceipt-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in handreceipt-core store operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Transfer not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The transfer queue reached its configured capacity
    #[error("Transfer queue is full ({0} active records)")]
    QueueFull(usize),

    /// A sync-state change outside the allowed edge set
    #[error("Invalid sync state transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: SyncState,
        to: SyncState,
    },
}
