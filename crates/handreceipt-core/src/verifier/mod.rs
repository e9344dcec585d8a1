//! QR custody-token verification.
//!
//! A scanned token must be well formed, recent, signed by its previous
//! holder and included in the holder's Merkle log. Accepted token ids are
//! remembered so the same token cannot be consumed twice.

mod capability;
mod replay;

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

pub use capability::{Ed25519Capability, TokenCapability};
pub use replay::ReplayCache;

use crate::config::VerifierConfig;
use crate::models::{ScanPayload, ScanResult};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Malformed QR payload: {0}")]
    MalformedPayload(String),
    #[error("Signature does not match holder {0}")]
    InvalidSignature(String),
    #[error("Merkle proof does not match root {0}")]
    ProofMismatch(String),
    #[error("Token issued at {0} is outside the accepted window")]
    Expired(DateTime<Utc>),
    #[error("Token {0} has already been used on this device")]
    ReplayDetected(String),
}

pub struct QrVerifier<C> {
    capability: C,
    config: VerifierConfig,
    consumed: Mutex<ReplayCache>,
}

impl<C: TokenCapability> QrVerifier<C> {
    pub fn new(capability: C, config: VerifierConfig) -> Self {
        let consumed = Mutex::new(ReplayCache::new(config.replay_cache_capacity));
        Self {
            capability,
            config,
            consumed,
        }
    }

    /// Decode scanner output with the capability, then [`Self::verify`].
    pub fn verify_scan(&self, raw: &[u8]) -> Result<ScanResult, VerificationError> {
        let text = self.capability.decode_qr(raw)?;
        self.verify(&text)
    }

    pub fn verify(&self, raw: &str) -> Result<ScanResult, VerificationError> {
        self.verify_at(raw, Utc::now())
    }

    pub(crate) fn verify_at(
        &self,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<ScanResult, VerificationError> {
        let payload: ScanPayload = serde_json::from_str(raw.trim())
            .map_err(|error| VerificationError::MalformedPayload(error.to_string()))?;
        let proof = payload.merkle_proof.clone();
        let scan = into_scan_result(payload)?;

        self.check_window(&scan, now)?;

        if self.lock_consumed().contains(&scan.id) {
            tracing::warn!("Rejected replayed token {}", scan.id);
            return Err(VerificationError::ReplayDetected(scan.id));
        }
        if !self.capability.verify_signature(&scan) {
            return Err(VerificationError::InvalidSignature(scan.previous_holder));
        }
        if !self.capability.verify_merkle_proof(&scan, &proof) {
            return Err(VerificationError::ProofMismatch(scan.merkle_root));
        }

        {
            let mut consumed = self.lock_consumed();
            if consumed.contains(&scan.id) {
                return Err(VerificationError::ReplayDetected(scan.id));
            }
            consumed.record(&scan.id);
        }

        tracing::info!(
            "Verified token {} for property {}",
            scan.id,
            scan.property_id
        );
        Ok(scan)
    }

    fn check_window(&self, scan: &ScanResult, now: DateTime<Utc>) -> Result<(), VerificationError> {
        let max_age = Duration::seconds(self.config.max_token_age_secs);
        let skew = Duration::seconds(self.config.clock_skew_secs);
        if now - scan.timestamp > max_age || scan.timestamp - now > skew {
            return Err(VerificationError::Expired(scan.timestamp));
        }
        Ok(())
    }

    fn lock_consumed(&self) -> std::sync::MutexGuard<'_, ReplayCache> {
        self.consumed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn into_scan_result(payload: ScanPayload) -> Result<ScanResult, VerificationError> {
    let id = required(payload.id, "id")?;
    let property_id = required(payload.property_id, "propertyId")?;
    let signature = required(payload.signature, "signature")?;
    let merkle_root = required(payload.merkle_root, "merkleRoot")?;
    let previous_holder = required(payload.previous_holder, "previousHolder")?;
    let timestamp = payload
        .timestamp
        .ok_or_else(|| VerificationError::MalformedPayload("missing timestamp".to_string()))?;

    if capability::decode_digest(&merkle_root).is_err() {
        return Err(VerificationError::MalformedPayload(
            "merkleRoot must be a 64 character hex digest".to_string(),
        ));
    }

    Ok(ScanResult {
        id,
        property_id,
        timestamp,
        signature,
        previous_holder,
        merkle_root: merkle_root.to_ascii_lowercase(),
        location: crate::util::normalize_text_option(payload.location),
    })
}

fn required(value: Option<String>, field: &str) -> Result<String, VerificationError> {
    crate::util::normalize_text_option(value)
        .ok_or_else(|| VerificationError::MalformedPayload(format!("missing {field}")))
}
