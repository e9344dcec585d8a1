//! Local sync bookkeeping for queued transfers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Transfer;

/// Device-local progress of getting a transfer committed to the server.
///
/// Allowed edges: `Pending -> Syncing`, `Syncing -> Completed | Failed`,
/// `Failed -> Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Pending,
    Syncing,
    Completed,
    Failed,
}

impl SyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Syncing)
                | (Self::Syncing, Self::Completed | Self::Failed)
                | (Self::Failed, Self::Pending)
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown sync state '{other}'")),
        }
    }
}

/// A transfer together with its local queue bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTransfer {
    pub transfer: Transfer,
    pub sync_state: SyncState,
    /// Failed commit attempts so far.
    pub retry_count: u32,
    /// `false` once the record is terminal and needs the user.
    pub retryable: bool,
    pub last_error: Option<String>,
    /// Unix ms before which a failed record is not retried.
    pub next_attempt_at: Option<i64>,
    /// Set as soon as a commit request has been sent at least once.
    pub commit_attempted: bool,
    /// Unix ms of first enqueue.
    pub enqueued_at: i64,
    /// Insertion order; FIFO key within a property.
    pub seq: i64,
    /// The user cancelled on this device. The transfer payload is left as
    /// first queued so a retried commit carries the same body.
    #[serde(default)]
    pub cancel_requested: bool,
}

impl QueuedTransfer {
    /// A failed record that will not be retried automatically.
    pub const fn requires_attention(&self) -> bool {
        matches!(self.sync_state, SyncState::Failed) && !self.retryable
    }

    /// Cancelled on the device and never sent, so nothing to tell the server.
    pub const fn is_locally_cancelled(&self) -> bool {
        self.cancel_requested && !self.commit_attempted
    }

    /// Whether the drain may pick this record up at `now_ms`.
    pub fn is_eligible(&self, now_ms: i64) -> bool {
        match self.sync_state {
            SyncState::Pending => true,
            SyncState::Failed => {
                self.retryable && self.next_attempt_at.is_none_or(|at| at <= now_ms)
            }
            SyncState::Syncing | SyncState::Completed => false,
        }
    }
}

/// Filter for listing queued transfers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferFilter {
    pub property_id: Option<String>,
    pub sync_states: Vec<SyncState>,
}

impl TransferFilter {
    #[must_use]
    pub fn property(property_id: impl Into<String>) -> Self {
        Self {
            property_id: Some(property_id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn states(states: &[SyncState]) -> Self {
        Self {
            property_id: None,
            sync_states: states.to_vec(),
        }
    }

    pub fn matches(&self, record: &QueuedTransfer) -> bool {
        let property_ok = self
            .property_id
            .as_deref()
            .is_none_or(|property| property == record.transfer.property_id);
        let state_ok = self.sync_states.is_empty() || self.sync_states.contains(&record.sync_state);
        property_ok && state_ok
    }
}

/// Queue counters surfaced to the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub syncing: usize,
    pub failed: usize,
    pub requires_attention: usize,
    pub completed_history: usize,
    /// Unix ms of the last finished drain.
    pub last_sync_at: Option<i64>,
}
