//! Remote transfer service contract.

mod http;

use std::future::Future;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

pub use http::HttpTransferApi;

use crate::models::{OfflineRequest, Transfer, TransferId};
use crate::util::compact_text;

/// How the orchestrator should react to a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeout, unreachable network or an overloaded server; retry later.
    Transient,
    /// 401; refresh the token and retry once.
    Unauthorized,
    /// Business rejection; never retried automatically.
    Permanent,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Server unavailable: {message}")]
    Unavailable { status: u16, message: String },
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Rejected by server: {message}")]
    Rejected { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = parse_api_error(status, body);
        match status.as_u16() {
            401 => Self::Unauthorized(message),
            408 | 429 => Self::Unavailable {
                status: status.as_u16(),
                message,
            },
            code if status.is_server_error() => Self::Unavailable {
                status: code,
                message,
            },
            code => Self::Rejected {
                status: code,
                message,
            },
        }
    }

    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout
            | Self::Network(_)
            | Self::Unavailable { .. }
            | Self::InvalidResponse(_) => FailureKind::Transient,
            Self::Unauthorized(_) => FailureKind::Unauthorized,
            Self::Rejected { .. } => FailureKind::Permanent,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::InvalidResponse(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}

/// REST endpoints the orchestrator talks to. Every call carries the bearer
/// token so the caller can refresh and retry on `401`.
pub trait TransferApi: Send + Sync {
    /// `POST /transfers`, idempotent on `transfer.id`.
    fn create_transfer(
        &self,
        token: &str,
        transfer: &Transfer,
    ) -> impl Future<Output = ApiResult<Transfer>> + Send;

    /// `GET /transfers/{id}`
    fn get_transfer(
        &self,
        token: &str,
        id: &TransferId,
    ) -> impl Future<Output = ApiResult<Transfer>> + Send;

    /// `POST /transfers/{id}/approve`
    fn approve(
        &self,
        token: &str,
        id: &TransferId,
    ) -> impl Future<Output = ApiResult<Transfer>> + Send;

    /// `POST /transfers/scan-qr`, server-side check of a scanned token.
    fn scan_qr(&self, token: &str, raw: &str)
        -> impl Future<Output = ApiResult<Transfer>> + Send;

    /// `GET /transfers/pending`
    fn list_pending(&self, token: &str) -> impl Future<Output = ApiResult<Vec<Transfer>>> + Send;

    /// `GET /transfers/property/{id}`
    fn list_for_property(
        &self,
        token: &str,
        property_id: &str,
    ) -> impl Future<Output = ApiResult<Vec<Transfer>>> + Send;

    /// Send a queued generic mutation.
    fn replay(
        &self,
        token: &str,
        request: &OfflineRequest,
    ) -> impl Future<Output = ApiResult<()>> + Send;
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Human readable message for a non-success response.
pub fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}
