
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use handreceipt_core::db::FailureUpdate;
use handreceipt_core::models::{HttpMethod, TransferFilter};
use handreceipt_core::services::OfflineRequestQueue;
use handreceipt_core::sync::{SyncReport, TransferOutcome, TransferReport};
use handreceipt_core::verifier::VerificationError;
use handreceipt_core::{SyncState, Transfer, TransferId, TransferStatus};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use crate::cli::CompletionShell;
use crate::commands::common::{
    format_relative_time, format_report_lines, format_sync_timestamp, normalize_payload,
    normalize_transfer_identifier, resolve_transfer_id, Context,
};
use crate::commands::completions::run_completions;
use crate::commands::config::{apply_profile_update, ProfileUpdate};
use crate::commands::manage::{run_acknowledge, run_cancel};
use crate::commands::requests::parse_request_body;
use crate::commands::scan::run_scan;
use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

const HOLDER_SEED: [u8; 32] = [9u8; 32];

fn test_context(dir: &TempDir, profile: CliProfile) -> Context {
    Context {
        profile_name: "test".to_string(),
        profile,
        db_path: dir.path().join("queue.db"),
    }
}

fn profile_trusting_holder() -> CliProfile {
    let key = SigningKey::from_bytes(&HOLDER_SEED);
    let mut profile = CliProfile::default();
    profile.holder_keys.insert(
        "alice".to_string(),
        hex::encode(key.verifying_key().to_bytes()),
    );
    profile
}

/// A token issued by `alice` whose leaf is its own Merkle root.
fn signed_token(id: &str, property_id: &str) -> String {
    let timestamp = Utc::now().timestamp();
    let leaf = format!("{id}:{property_id}:{timestamp}:alice");
    let root = blake3::hash(leaf.as_bytes()).to_hex().to_string();
    let message = format!("{id}:{property_id}:{timestamp}:{root}");
    let signature = BASE64.encode(
        SigningKey::from_bytes(&HOLDER_SEED)
            .sign(message.as_bytes())
            .to_bytes(),
    );
    serde_json::json!({
        "id": id,
        "propertyId": property_id,
        "timestamp": chrono::DateTime::from_timestamp(timestamp, 0).unwrap().to_rfc3339(),
        "signature": signature,
        "previousHolder": "alice",
        "merkleRoot": root,
    })
    .to_string()
}

fn transfer_with_id(id: &str, property_id: &str) -> Transfer {
    let mut transfer = Transfer::new(property_id, "alice", "bob");
    transfer.id = id.parse().unwrap();
    transfer
}

#[test]
fn normalize_payload_trims_and_rejects_empty() {
    assert_eq!(normalize_payload("  {}  "), Some("{}".to_string()));
    assert_eq!(normalize_payload(" \n\t "), None);
}

#[test]
fn normalize_transfer_identifier_rejects_empty() {
    assert!(matches!(
        normalize_transfer_identifier("  "),
        Err(CliError::EmptyTransferId)
    ));
    assert_eq!(normalize_transfer_identifier(" 0190 ").unwrap(), "0190");
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 24 * 60 * 60_000, now), "3d ago");
}

#[test]
fn format_sync_timestamp_returns_utc_label() {
    assert_eq!(format_sync_timestamp(0), "1970-01-01 00:00:00 UTC");
}

#[test]
fn report_lines_cover_outcomes() {
    let completed = TransferId::new();
    let failed = TransferId::new();
    let report = SyncReport {
        transfers: vec![
            TransferReport {
                id: completed,
                property_id: "P1".to_string(),
                outcome: TransferOutcome::Completed {
                    status: TransferStatus::Approved,
                },
            },
            TransferReport {
                id: failed,
                property_id: "P2".to_string(),
                outcome: TransferOutcome::Failed {
                    reason: "forbidden".to_string(),
                    retryable: false,
                },
            },
        ],
        requests_replayed: 2,
        request_error: Some("server unavailable".to_string()),
        next_retry_at: Some(0),
        ..SyncReport::default()
    };

    let lines = format_report_lines(&report);
    assert!(lines[0].contains("completed"));
    assert!(lines[1].contains("failed: forbidden"));
    assert!(lines.contains(&"Requests replayed: 2, remaining: 0".to_string()));
    assert!(lines.contains(&"Request replay stopped: server unavailable".to_string()));
    assert!(lines.contains(&"Next retry at 1970-01-01 00:00:00 UTC".to_string()));

    let offline = SyncReport {
        offline: true,
        ..SyncReport::default()
    };
    assert_eq!(
        format_report_lines(&offline),
        vec!["Offline; nothing was sent.".to_string()]
    );
}

#[test]
fn parse_request_body_accepts_json_or_nothing() {
    assert_eq!(parse_request_body(None).unwrap(), None);
    assert_eq!(parse_request_body(Some("  ")).unwrap(), None);
    assert_eq!(
        parse_request_body(Some(r#"{"note":"checked"}"#)).unwrap(),
        Some(serde_json::json!({"note": "checked"}))
    );
    assert!(matches!(
        parse_request_body(Some("{oops")),
        Err(CliError::Serialization(_))
    ));
}

#[test]
fn apply_profile_update_merges_and_activates() {
    let mut config = CliProfilesConfig::default();
    let key = "cd".repeat(32);
    let name = apply_profile_update(
        &mut config,
        Some("depot"),
        ProfileUpdate {
            api_url: Some("https://api.example.com/api/".to_string()),
            auth_url: Some(" https://auth.example.com ".to_string()),
            auth_api_key: None,
            holder_keys: vec![format!("alice={key}")],
        },
        false,
    )
    .unwrap();
    assert_eq!(name, "depot");
    assert_eq!(config.active_profile.as_deref(), Some("depot"));

    apply_profile_update(&mut config, Some("depot"), ProfileUpdate::default(), false).unwrap();
    let profile = config.profile("depot").unwrap();
    assert_eq!(
        profile.engine.api_base_url.as_deref(),
        Some("https://api.example.com/api")
    );
    assert_eq!(profile.auth_url(), Some("https://auth.example.com".to_string()));
    assert_eq!(profile.holder_keys.get("alice"), Some(&key));
}

#[test]
fn apply_profile_update_rejects_bad_values() {
    let mut config = CliProfilesConfig::default();
    let error = apply_profile_update(
        &mut config,
        Some("depot"),
        ProfileUpdate {
            api_url: Some("api.example.com".to_string()),
            ..ProfileUpdate::default()
        },
        false,
    )
    .unwrap_err();
    assert!(matches!(error, CliError::EngineConfig(_)));

    let error = apply_profile_update(
        &mut config,
        Some("depot"),
        ProfileUpdate {
            holder_keys: vec!["alice=nothex".to_string()],
            ..ProfileUpdate::default()
        },
        false,
    )
    .unwrap_err();
    assert!(matches!(error, CliError::Config(_)));
}

#[tokio::test(flavor = "current_thread")]
async fn scan_queues_verified_transfer_once() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(&dir, profile_trusting_holder());
    let token = signed_token("tok-1", "P1");

    run_scan(&ctx, Some(&token), "bob", false).await.unwrap();

    let queue = ctx.open_queue().await.unwrap();
    let records = queue.list(&TransferFilter::default()).await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.sync_state, SyncState::Pending);
    assert_eq!(record.transfer.property_id, "P1");
    assert_eq!(record.transfer.from_user_id, "alice");
    assert_eq!(record.transfer.to_user_id, "bob");
    assert_eq!(record.transfer.qr_code.as_deref(), Some("tok-1"));
    drop(queue);

    let error = run_scan(&ctx, Some(&token), "bob", false)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        CliError::Verification(VerificationError::ReplayDetected(ref id)) if id == "tok-1"
    ));
}

#[tokio::test(flavor = "current_thread")]
async fn scan_rejects_untrusted_holder_without_queueing() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(&dir, CliProfile::default());
    let token = signed_token("tok-2", "P1");

    let error = run_scan(&ctx, Some(&token), "bob", false)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        CliError::Verification(VerificationError::InvalidSignature(_))
    ));

    let stats = ctx.open_queue().await.unwrap().stats().await.unwrap();
    assert_eq!(stats.total, 0);
}

#[tokio::test(flavor = "current_thread")]
async fn scan_requires_recipient() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(&dir, profile_trusting_holder());
    let error = run_scan(&ctx, Some("{}"), "  ", false).await.unwrap_err();
    assert!(matches!(error, CliError::EmptyRecipient));
}

#[tokio::test(flavor = "current_thread")]
async fn resolve_transfer_id_supports_exact_and_prefix_id() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(&dir, CliProfile::default());
    let queue = ctx.open_queue().await.unwrap();
    let first = transfer_with_id("11111111-1111-7111-8111-111111111111", "P1");
    let second = transfer_with_id("11111111-1111-7111-8111-222222222222", "P2");
    queue.enqueue(&first).await.unwrap();
    queue.enqueue(&second).await.unwrap();

    let by_exact = resolve_transfer_id("11111111-1111-7111-8111-111111111111", &queue)
        .await
        .unwrap();
    assert_eq!(by_exact, first.id);

    let by_prefix = resolve_transfer_id("11111111-1111-7111-8111-2", &queue)
        .await
        .unwrap();
    assert_eq!(by_prefix, second.id);

    let error = resolve_transfer_id("11111111", &queue).await.unwrap_err();
    assert!(matches!(error, CliError::AmbiguousTransferId(_)));

    let error = resolve_transfer_id("ffff", &queue).await.unwrap_err();
    assert!(matches!(error, CliError::TransferNotFound(_)));
}

#[tokio::test(flavor = "current_thread")]
async fn cancel_and_acknowledge_by_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(&dir, CliProfile::default());
    let queue = ctx.open_queue().await.unwrap();
    let pending = transfer_with_id("22222222-2222-7222-8222-111111111111", "P1");
    let failed = transfer_with_id("33333333-3333-7333-8333-111111111111", "P2");
    queue.enqueue(&pending).await.unwrap();
    queue.enqueue(&failed).await.unwrap();
    queue
        .update_sync_state(&failed.id, SyncState::Syncing, None)
        .await
        .unwrap();
    queue
        .record_failure(
            &failed.id,
            &FailureUpdate {
                error: "forbidden".to_string(),
                retryable: false,
                retry_count: 1,
                next_attempt_at: None,
            },
        )
        .await
        .unwrap();

    run_cancel(&ctx, "22222222").await.unwrap();
    let cancelled = queue.get(&pending.id).await.unwrap().unwrap();
    assert!(cancelled.cancel_requested);
    assert_eq!(cancelled.transfer.status, pending.status);

    assert!(run_acknowledge(&ctx, "22222222").await.is_err());
    run_acknowledge(&ctx, "33333333").await.unwrap();
    assert!(queue.get(&failed.id).await.unwrap().is_none());
}

#[tokio::test(flavor = "current_thread")]
async fn sync_requires_api_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(&dir, CliProfile::default());
    if std::env::var_os(crate::config_profiles::API_URL_ENV).is_some() {
        return;
    }

    let error = ctx.open_orchestrator().await.err().unwrap();
    assert!(matches!(error, CliError::SyncNotConfigured));
}

#[tokio::test(flavor = "current_thread")]
async fn offline_requests_share_the_queue_database() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(&dir, CliProfile::default());
    let queue = ctx.open_queue().await.unwrap();
    let requests = OfflineRequestQueue::new(queue.shared_database());

    requests
        .push(HttpMethod::Post, "/properties/P1/notes", None)
        .await
        .unwrap();
    drop(requests);
    drop(queue);

    let reopened = ctx.open_queue().await.unwrap();
    let requests = OfflineRequestQueue::new(reopened.shared_database());
    let listed = requests.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].endpoint, "/properties/P1/notes");
}

#[test]
fn run_completions_writes_bash_script_file() {
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("handreceipt.bash");

    run_completions(CompletionShell::Bash, Some(output_path.as_path())).unwrap();

    let script = std::fs::read_to_string(&output_path).unwrap();
    assert!(script.contains("_handreceipt()"));
    assert!(script.contains("complete -F _handreceipt"));
}
