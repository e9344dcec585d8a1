use std::io;

use handreceipt_core::auth::AuthError;
use handreceipt_core::config::ConfigError;
use handreceipt_core::sync::SyncError;
use handreceipt_core::verifier::VerificationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] handreceipt_core::Error),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("Scan rejected: {0}")]
    Verification(#[from] VerificationError),
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
    #[error(transparent)]
    EngineConfig(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No scan payload provided")]
    EmptyPayload,
    #[error("Recipient user ID cannot be empty")]
    EmptyRecipient,
    #[error("Transfer ID cannot be empty")]
    EmptyTransferId,
    #[error("Transfer not found for id/prefix: {0}")]
    TransferNotFound(String),
    #[error("{0}")]
    AmbiguousTransferId(String),
    #[error("Offline request not found: {0}")]
    RequestNotFound(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Sync is not configured. Run `handreceipt config init --api-url <URL>` + `handreceipt auth login`, or set HANDRECEIPT_API_URL and HANDRECEIPT_ACCESS_TOKEN."
    )]
    SyncNotConfigured,
}
