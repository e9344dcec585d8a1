use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use chrono::Utc;
use handreceipt_core::api::HttpTransferApi;
use handreceipt_core::config::EngineConfig;
use handreceipt_core::models::{OfflineRequest, TransferFilter};
use handreceipt_core::network::{Connectivity, ConnectivitySignal};
use handreceipt_core::services::{OfflineRequestQueue, TransferQueueStore};
use handreceipt_core::sync::{SyncOrchestrator, SyncReport, TransferOutcome};
use handreceipt_core::util::compact_text;
use handreceipt_core::{QueuedTransfer, TransferId};
use serde::Serialize;

use crate::auth::CliTokenSource;
use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

pub type Orchestrator = SyncOrchestrator<HttpTransferApi, CliTokenSource>;

/// Everything a command needs from the resolved profile.
pub struct Context {
    pub profile_name: String,
    pub profile: CliProfile,
    pub db_path: PathBuf,
}

impl Context {
    pub fn load(profile: Option<&str>, db_path: Option<PathBuf>) -> Result<Self, CliError> {
        let config = CliProfilesConfig::load().map_err(CliError::Config)?;
        let profile_name = config.resolve_profile_name(profile);
        let profile = config.profile(&profile_name).cloned().unwrap_or_default();
        Ok(Self {
            profile_name,
            profile,
            db_path: resolve_db_path(db_path),
        })
    }

    pub const fn engine(&self) -> &EngineConfig {
        &self.profile.engine
    }

    pub async fn open_queue(&self) -> Result<TransferQueueStore, CliError> {
        Ok(TransferQueueStore::open_path(&self.db_path, self.engine().queue.clone()).await?)
    }

    /// Build the sync engine for this profile.
    ///
    /// The returned signal starts online; `sync --watch` hands it to a
    /// network monitor.
    pub async fn open_orchestrator(&self) -> Result<(Orchestrator, ConnectivitySignal), CliError> {
        let api = self.api()?;
        let tokens = CliTokenSource::for_profile(&self.profile_name, &self.profile)?
            .ok_or(CliError::SyncNotConfigured)?;

        let queue = self.open_queue().await?;
        let requests = OfflineRequestQueue::new(queue.shared_database());
        let signal = ConnectivitySignal::new(Connectivity::Online);
        let orchestrator = SyncOrchestrator::new(
            queue,
            requests,
            api,
            tokens,
            self.engine().sync.clone(),
            signal.subscribe(),
        );
        tracing::debug!("Sync engine ready for profile '{}'", self.profile_name);
        Ok((orchestrator, signal))
    }

    /// HTTP client for the profile's API.
    pub fn api(&self) -> Result<HttpTransferApi, CliError> {
        let api_url = self
            .profile
            .api_base_url()
            .map_err(CliError::Config)?
            .ok_or(CliError::SyncNotConfigured)?;
        Ok(HttpTransferApi::new(&api_url)?)
    }
}

#[derive(Debug, Serialize)]
pub struct TransferListItem {
    pub id: String,
    pub property_id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub status: String,
    pub sync_state: String,
    pub retry_count: u32,
    pub requires_attention: bool,
    pub cancel_requested: bool,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<i64>,
    pub enqueued_at: i64,
    pub relative_time: String,
}

pub fn transfer_to_list_item(record: &QueuedTransfer) -> TransferListItem {
    let now_ms = Utc::now().timestamp_millis();
    TransferListItem {
        id: record.transfer.id.to_string(),
        property_id: record.transfer.property_id.clone(),
        from_user_id: record.transfer.from_user_id.clone(),
        to_user_id: record.transfer.to_user_id.clone(),
        status: record.transfer.status.to_string(),
        sync_state: record.sync_state.to_string(),
        retry_count: record.retry_count,
        requires_attention: record.requires_attention(),
        cancel_requested: record.cancel_requested,
        last_error: record.last_error.clone(),
        next_attempt_at: record.next_attempt_at,
        enqueued_at: record.enqueued_at,
        relative_time: format_relative_time(record.enqueued_at, now_ms),
    }
}

pub fn format_transfer_lines(records: &[QueuedTransfer]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let short_id = short_id(&record.transfer.id.to_string());
            let state = if record.requires_attention() {
                "attention".to_string()
            } else if record.cancel_requested {
                "cancelled".to_string()
            } else {
                record.sync_state.to_string()
            };
            let line = format!(
                "{short_id:<13}  {:<12}  {:<10}  {:<9}  {} -> {}  {}",
                record.transfer.property_id,
                record.transfer.status.to_string(),
                state,
                record.transfer.from_user_id,
                record.transfer.to_user_id,
                format_relative_time(record.enqueued_at, now_ms),
            );
            match &record.last_error {
                Some(error) => format!("{line}  ({})", compact_text(error)),
                None => line,
            }
        })
        .collect()
}

pub fn format_request_lines(requests: &[OfflineRequest]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    requests
        .iter()
        .map(|request| {
            format!(
                "{:<36}  {:<6}  {}  {}",
                request.id,
                request.method.as_str(),
                request.endpoint,
                format_relative_time(request.created_at, now_ms),
            )
        })
        .collect()
}

pub fn format_report_lines(report: &SyncReport) -> Vec<String> {
    if report.offline {
        return vec!["Offline; nothing was sent.".to_string()];
    }

    let mut lines = report
        .transfers
        .iter()
        .map(|entry| {
            let outcome = match &entry.outcome {
                TransferOutcome::Completed { status } => format!("completed ({status})"),
                TransferOutcome::Cancelled => "cancelled locally".to_string(),
                TransferOutcome::RetryScheduled {
                    attempt,
                    next_attempt_at,
                } => format!(
                    "retry #{attempt} at {}",
                    format_sync_timestamp(*next_attempt_at)
                ),
                TransferOutcome::Failed { reason, .. } => {
                    format!("failed: {}", compact_text(reason))
                }
                TransferOutcome::Deferred => "deferred".to_string(),
            };
            format!(
                "{:<13}  {:<12}  {outcome}",
                short_id(&entry.id.to_string()),
                entry.property_id
            )
        })
        .collect::<Vec<_>>();

    lines.push(format!(
        "Requests replayed: {}, remaining: {}",
        report.requests_replayed, report.requests_remaining
    ));
    if let Some(error) = &report.request_error {
        lines.push(format!("Request replay stopped: {}", compact_text(error)));
    }
    if let Some(at) = report.next_retry_at {
        lines.push(format!("Next retry at {}", format_sync_timestamp(at)));
    }
    lines
}

/// Resolve a full transfer id or a unique prefix against the local queue.
pub async fn resolve_transfer_id(
    query: &str,
    queue: &TransferQueueStore,
) -> Result<TransferId, CliError> {
    let query = normalize_transfer_identifier(query)?;
    if let Ok(id) = query.parse::<TransferId>() {
        if queue.get(&id).await?.is_some() {
            return Ok(id);
        }
    }

    let mut records = queue.list(&TransferFilter::default()).await?;
    records.extend(queue.history().await?);
    let matches = records
        .iter()
        .map(|record| record.transfer.id)
        .filter(|id| id.to_string().starts_with(&query))
        .collect::<Vec<_>>();

    match matches.as_slice() {
        [] => Err(CliError::TransferNotFound(query)),
        [id] => Ok(*id),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|id| short_id(&id.to_string()))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousTransferId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn normalize_transfer_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyTransferId)
    } else {
        Ok(trimmed.to_string())
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn normalize_payload(payload: &str) -> Option<String> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Scan payload from the argument, falling back to piped stdin.
pub fn resolve_scan_payload(payload: Option<&str>) -> Result<String, CliError> {
    if let Some(payload) = payload.and_then(normalize_payload) {
        return Ok(payload);
    }
    read_piped_stdin()?.ok_or(CliError::EmptyPayload)
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_payload(&buffer))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("HANDRECEIPT_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join("handreceipt")
        .join("queue.db")
}

