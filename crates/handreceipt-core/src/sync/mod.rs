//! Queue draining against the remote service.

mod backoff;
mod orchestrator;
mod report;
mod single_flight;

use thiserror::Error;

pub use backoff::{next_attempt_at, retry_delay};
pub use orchestrator::{SubmitOutcome, SyncOrchestrator};
pub use report::{SyncReport, TransferOutcome, TransferReport};
pub use single_flight::SingleFlight;

use crate::api::ApiError;
use crate::auth::AuthError;

/// Errors surfaced by orchestrator operations.
///
/// Cloneable so every caller attached to a shared drain receives it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("Local store error: {0}")]
    Storage(String),
    #[error("No usable access token: {0}")]
    Auth(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("Device is offline")]
    Offline,
}

impl From<crate::Error> for SyncError {
    fn from(error: crate::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

impl From<AuthError> for SyncError {
    fn from(error: AuthError) -> Self {
        Self::Auth(error.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
