//! Results of a drain pass.

use serde::Serialize;

use crate::models::{TransferId, TransferStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransferOutcome {
    /// Committed; `status` is the server's answer.
    Completed { status: TransferStatus },
    /// Cancelled on the device before any commit was sent.
    Cancelled,
    /// Transient failure; eligible again at `next_attempt_at` (unix ms).
    RetryScheduled { attempt: u32, next_attempt_at: i64 },
    /// Needs the user; not retried automatically.
    Failed { reason: String, retryable: bool },
    /// Not attempted because an earlier transfer for the property is waiting.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub id: TransferId,
    pub property_id: String,
    #[serde(flatten)]
    pub outcome: TransferOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// The pass was skipped because the device is offline.
    pub offline: bool,
    pub transfers: Vec<TransferReport>,
    pub requests_replayed: usize,
    pub requests_remaining: usize,
    pub request_error: Option<String>,
    /// Earliest unix ms at which a scheduled retry becomes eligible.
    pub next_retry_at: Option<i64>,
    pub started_at: i64,
    pub finished_at: i64,
}

impl SyncReport {
    pub(crate) fn offline(now_ms: i64) -> Self {
        Self {
            offline: true,
            started_at: now_ms,
            finished_at: now_ms,
            ..Self::default()
        }
    }

    /// Nothing failed or was pushed back to a later pass.
    pub fn is_clean(&self) -> bool {
        !self.offline
            && self.request_error.is_none()
            && self.transfers.iter().all(|report| {
                !matches!(
                    report.outcome,
                    TransferOutcome::Failed { .. } | TransferOutcome::RetryScheduled { .. }
                )
            })
    }

    pub fn count(&self, matches: impl Fn(&TransferOutcome) -> bool) -> usize {
        self.transfers
            .iter()
            .filter(|report| matches(&report.outcome))
            .count()
    }

    pub fn outcome_for(&self, id: &TransferId) -> Option<&TransferOutcome> {
        self.transfers
            .iter()
            .find(|report| &report.id == id)
            .map(|report| &report.outcome)
    }
}
