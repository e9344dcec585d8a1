//! Async stores shared across clients.

mod request_queue;
mod transfer_queue;

pub use request_queue::OfflineRequestQueue;
pub use transfer_queue::{CommitStart, TransferQueueStore};
