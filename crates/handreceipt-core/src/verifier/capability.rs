//! Cryptographic checks behind the verifier.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use super::VerificationError;
use crate::models::ScanResult;

/// Platform capability that decodes QR images and checks token cryptography.
///
/// Implementations are synchronous and side-effect free.
pub trait TokenCapability: Send + Sync {
    /// Decode raw scanner output into the token text.
    fn decode_qr(&self, raw: &[u8]) -> Result<String, VerificationError>;

    /// Whether `scan.signature` was produced by `scan.previous_holder`.
    fn verify_signature(&self, scan: &ScanResult) -> bool;

    /// Whether `proof` links the token to `scan.merkle_root`.
    fn verify_merkle_proof(&self, scan: &ScanResult, proof: &[String]) -> bool;
}

/// Ed25519 signatures with a BLAKE3 Merkle inclusion proof.
///
/// The signature is base64 over [`ScanResult::signed_message`]. The leaf is
/// BLAKE3 of `"{id}:{property_id}:{unix_secs}:{previous_holder}"` and each
/// proof step hashes the sorted pair of the running hash and its sibling.
#[derive(Debug, Clone, Default)]
pub struct Ed25519Capability {
    holders: HashMap<String, VerifyingKey>,
}

impl Ed25519Capability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust `key` for tokens issued by `holder`.
    pub fn register(&mut self, holder: impl Into<String>, key: VerifyingKey) {
        self.holders.insert(holder.into(), key);
    }

    /// Register a hex-encoded 32-byte public key.
    pub fn register_hex(&mut self, holder: impl Into<String>, key_hex: &str) -> Result<(), String> {
        let bytes: [u8; 32] = hex::decode(key_hex.trim())
            .map_err(|error| format!("invalid public key hex: {error}"))?
            .try_into()
            .map_err(|_| "public key must be 32 bytes".to_string())?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|error| format!("invalid public key: {error}"))?;
        self.register(holder, key);
        Ok(())
    }

    pub fn holder_count(&self) -> usize {
        self.holders.len()
    }
}

impl TokenCapability for Ed25519Capability {
    fn decode_qr(&self, raw: &[u8]) -> Result<String, VerificationError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| VerificationError::MalformedPayload("QR content is not UTF-8".into()))?;
        Ok(text.trim().to_string())
    }

    fn verify_signature(&self, scan: &ScanResult) -> bool {
        let Some(key) = self.holders.get(&scan.previous_holder) else {
            tracing::debug!("No key registered for holder {}", scan.previous_holder);
            return false;
        };
        let Ok(bytes) = BASE64.decode(scan.signature.trim()) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&bytes) else {
            return false;
        };
        key.verify(scan.signed_message().as_bytes(), &signature)
            .is_ok()
    }

    fn verify_merkle_proof(&self, scan: &ScanResult, proof: &[String]) -> bool {
        let Ok(root) = decode_digest(&scan.merkle_root) else {
            return false;
        };

        let mut current = *leaf_hash(scan).as_bytes();
        for sibling in proof {
            let Ok(sibling) = decode_digest(sibling) else {
                return false;
            };
            current = hash_pair(&current, &sibling);
        }
        current == root
    }
}

pub(crate) fn leaf_hash(scan: &ScanResult) -> blake3::Hash {
    blake3::hash(
        format!(
            "{}:{}:{}:{}",
            scan.id,
            scan.property_id,
            scan.timestamp.timestamp(),
            scan.previous_holder
        )
        .as_bytes(),
    )
}

pub(crate) fn hash_pair(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = blake3::Hasher::new();
    hasher.update(first);
    hasher.update(second);
    *hasher.finalize().as_bytes()
}

/// Parse a 64-character hex digest.
pub(crate) fn decode_digest(value: &str) -> Result<[u8; 32], hex::FromHexError> {
    let mut out = [0u8; 32];
    hex::decode_to_slice(value.trim(), &mut out)?;
    Ok(out)
}
