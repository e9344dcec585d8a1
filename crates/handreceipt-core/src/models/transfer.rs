//! Transfer model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ScanResult;

/// A unique identifier for a transfer, using UUID v7 (time-sortable).
///
/// Generated on the device and sent with every commit as the idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(Uuid);

impl TransferId {
    /// Create a new unique transfer ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// Domain status of a transfer.
///
/// Owned by the server once the transfer has been committed; the local copy
/// only guesses until then.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TransferStatus {
    #[default]
    #[serde(alias = "PENDING", alias = "pending")]
    Pending,
    #[serde(alias = "APPROVED", alias = "approved")]
    Approved,
    #[serde(alias = "REJECTED", alias = "rejected")]
    Rejected,
    #[serde(alias = "CANCELLED", alias = "cancelled")]
    Cancelled,
}

impl TransferStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    /// `Approved`, `Rejected` and `Cancelled` are final.
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(format!("unknown transfer status '{other}'")),
        }
    }
}

/// A custody-transfer intent for one property item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: TransferId,
    pub property_id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    #[serde(default)]
    pub status: TransferStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    /// Create a pending transfer with a fresh id
    #[must_use]
    pub fn new(
        property_id: impl Into<String>,
        from_user_id: impl Into<String>,
        to_user_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TransferId::new(),
            property_id: property_id.into(),
            from_user_id: from_user_id.into(),
            to_user_id: to_user_id.into(),
            status: TransferStatus::Pending,
            qr_code: None,
            signature: None,
            approved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the transfer intent for a verified scan.
    ///
    /// The scanned token's holder becomes the sender; the token id is kept as
    /// the QR reference so the server can match the commit to the token.
    #[must_use]
    pub fn from_scan(scan: &ScanResult, to_user_id: impl Into<String>) -> Self {
        let mut transfer = Self::new(
            scan.property_id.clone(),
            scan.previous_holder.clone(),
            to_user_id,
        );
        transfer.qr_code = Some(scan.id.clone());
        transfer.signature = Some(scan.signature.clone());
        transfer
    }
}
