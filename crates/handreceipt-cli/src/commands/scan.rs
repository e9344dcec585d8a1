use handreceipt_core::models::TransferFilter;
use handreceipt_core::services::TransferQueueStore;
use handreceipt_core::verifier::{Ed25519Capability, QrVerifier, VerificationError};
use handreceipt_core::Transfer;

use crate::commands::common::{resolve_scan_payload, transfer_to_list_item, Context};
use crate::config_profiles::CliProfile;
use crate::error::CliError;

pub async fn run_scan(
    ctx: &Context,
    payload: Option<&str>,
    to_user_id: &str,
    as_json: bool,
) -> Result<(), CliError> {
    let to_user_id = to_user_id.trim();
    if to_user_id.is_empty() {
        return Err(CliError::EmptyRecipient);
    }

    let raw = resolve_scan_payload(payload)?;
    let verifier = build_verifier(&ctx.profile)?;
    let scan = verifier.verify_scan(raw.as_bytes())?;

    let queue = ctx.open_queue().await?;
    if token_already_queued(&queue, &scan.id).await? {
        return Err(VerificationError::ReplayDetected(scan.id).into());
    }

    let record = queue.enqueue(&Transfer::from_scan(&scan, to_user_id)).await?;
    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&transfer_to_list_item(&record))?
        );
    } else {
        println!(
            "Queued transfer {} of {} from {} to {}",
            record.transfer.id,
            record.transfer.property_id,
            record.transfer.from_user_id,
            record.transfer.to_user_id
        );
    }
    Ok(())
}

/// Verifier trusting the profile's registered holder keys.
pub fn build_verifier(profile: &CliProfile) -> Result<QrVerifier<Ed25519Capability>, CliError> {
    let mut capability = Ed25519Capability::new();
    for (holder, key) in &profile.holder_keys {
        capability
            .register_hex(holder.as_str(), key)
            .map_err(|error| CliError::Config(format!("holder '{holder}': {error}")))?;
    }
    if capability.holder_count() == 0 {
        tracing::warn!("No holder keys configured; every scan will fail signature checks");
    }
    Ok(QrVerifier::new(capability, profile.engine.verifier.clone()))
}

/// The in-memory replay cache only lives for one process, so also refuse
/// tokens already referenced by a queued or retained transfer.
pub async fn token_already_queued(
    queue: &TransferQueueStore,
    token_id: &str,
) -> Result<bool, CliError> {
    let mut records = queue.list(&TransferFilter::default()).await?;
    records.extend(queue.history().await?);
    Ok(records
        .iter()
        .any(|record| record.transfer.qr_code.as_deref() == Some(token_id)))
}
