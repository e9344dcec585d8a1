//! Scanned custody-transfer token models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw QR token payload as encoded by the issuing device.
///
/// Every field is optional at this level so that missing or ill-typed
/// fields can be reported as a malformed payload instead of a JSON error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub property_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub previous_holder: Option<String>,
    #[serde(default)]
    pub merkle_root: Option<String>,
    /// Hex-encoded sibling hashes from the token leaf up to `merkle_root`.
    #[serde(default)]
    pub merkle_proof: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// A validated scan. Consumed once to build a [`crate::models::Transfer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub id: String,
    pub property_id: String,
    pub timestamp: DateTime<Utc>,
    pub signature: String,
    pub previous_holder: String,
    pub merkle_root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl ScanResult {
    /// Message covered by the holder's signature and hashed into the Merkle leaf.
    pub fn signed_message(&self) -> String {
        signed_message(
            &self.id,
            &self.property_id,
            self.timestamp,
            &self.merkle_root,
        )
    }
}

pub(crate) fn signed_message(
    id: &str,
    property_id: &str,
    timestamp: DateTime<Utc>,
    merkle_root: &str,
) -> String {
    format!(
        "{id}:{property_id}:{}:{}",
        timestamp.timestamp(),
        merkle_root.to_ascii_lowercase()
    )
}
