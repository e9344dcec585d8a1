//! Database layer for HandReceipt

mod connection;
mod meta_repository;
mod migrations;
mod request_repository;
mod transfer_repository;

pub use connection::{Database, SharedDatabase};
pub use meta_repository::SqliteMetaRepository;
pub use request_repository::SqliteRequestRepository;
pub use transfer_repository::{FailureUpdate, SqliteTransferRepository};
