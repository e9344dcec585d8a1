//! Data models for HandReceipt sync

mod offline_request;
mod scan;
mod sync_state;
mod transfer;

pub use offline_request::{HttpMethod, OfflineRequest};
pub use scan::{ScanPayload, ScanResult};
pub use sync_state::{QueueStats, QueuedTransfer, SyncState, TransferFilter};
pub use transfer::{Transfer, TransferId, TransferStatus};
