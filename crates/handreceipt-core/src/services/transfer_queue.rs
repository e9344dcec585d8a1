//! Durable transfer queue shared by the orchestrator and the UI.

use std::path::PathBuf;

use crate::config::QueueConfig;
use crate::db::{
    Database, FailureUpdate, SharedDatabase, SqliteMetaRepository, SqliteTransferRepository,
};
use crate::models::{
    QueueStats, QueuedTransfer, SyncState, Transfer, TransferFilter, TransferId,
};
use crate::util::unix_millis_now;
use crate::{Error, Result};

/// Result of [`TransferQueueStore::begin_commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitStart {
    /// Cancelled locally before anything was sent; the record is gone.
    Cancelled,
    /// Flagged as attempted; send this record.
    Send(Box<QueuedTransfer>),
}

/// Single-writer store of queued transfers.
///
/// Every write is committed to `SQLite` before the call returns, so a crash
/// right after `enqueue` cannot lose the record.
#[derive(Clone)]
pub struct TransferQueueStore {
    db: SharedDatabase,
    config: QueueConfig,
}

impl TransferQueueStore {
    /// Open the queue at the given filesystem path.
    ///
    /// Records left in `Syncing` by an interrupted pass become retryable
    /// failures that are eligible immediately.
    pub async fn open_path(db_path: impl Into<PathBuf>, config: QueueConfig) -> Result<Self> {
        let db_path = db_path.into();
        let database = tokio::task::spawn_blocking(move || Database::open(&db_path))
            .await
            .map_err(|error| Error::Database(error.to_string()))??;
        Self::from_shared(database.into_shared(), config).await
    }

    /// Open an in-memory queue (primarily for tests).
    pub async fn open_in_memory(config: QueueConfig) -> Result<Self> {
        Self::from_shared(Database::open_in_memory()?.into_shared(), config).await
    }

    /// Wrap an already opened database shared with other stores.
    pub async fn from_shared(db: SharedDatabase, config: QueueConfig) -> Result<Self> {
        let store = Self { db, config };
        store.recover_interrupted().await?;
        Ok(store)
    }

    /// Turn records stuck in `Syncing` into retryable failures due now.
    ///
    /// Only safe while no drain pass is running against this database.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let recovered = {
            let db = self.db.lock().await;
            SqliteTransferRepository::new(db.connection()).recover_interrupted(unix_millis_now())?
        };
        if recovered > 0 {
            tracing::warn!("Recovered {recovered} transfer(s) interrupted mid-sync");
        }
        Ok(recovered)
    }

    /// The database handle, for stores that share the same file.
    pub fn shared_database(&self) -> SharedDatabase {
        self.db.clone()
    }

    /// Queue a transfer, or update it in place when its id is already known.
    ///
    /// Completed records are left untouched and returned as they are.
    pub async fn enqueue(&self, transfer: &Transfer) -> Result<QueuedTransfer> {
        if transfer.property_id.trim().is_empty() {
            return Err(Error::InvalidInput("property id cannot be empty".to_string()));
        }

        let db = self.db.lock().await;
        let repo = SqliteTransferRepository::new(db.connection());

        match repo.get(&transfer.id)? {
            Some(existing) if existing.sync_state == SyncState::Completed => {
                tracing::debug!("Transfer {} already synced; enqueue ignored", transfer.id);
                return Ok(existing);
            }
            Some(_) => {}
            None => {
                let active = repo.count_active()?;
                if active >= self.config.max_queue_size {
                    return Err(Error::QueueFull(active));
                }
            }
        }

        repo.upsert(transfer, unix_millis_now())?;
        let record = repo
            .get(&transfer.id)?
            .ok_or_else(|| Error::NotFound(transfer.id.to_string()))?;
        tracing::info!(
            "Queued transfer {} for property {}",
            transfer.id,
            transfer.property_id
        );
        Ok(record)
    }

    pub async fn get(&self, id: &TransferId) -> Result<Option<QueuedTransfer>> {
        let db = self.db.lock().await;
        SqliteTransferRepository::new(db.connection()).get(id)
    }

    /// List records FIFO by enqueue order.
    pub async fn list(&self, filter: &TransferFilter) -> Result<Vec<QueuedTransfer>> {
        let db = self.db.lock().await;
        SqliteTransferRepository::new(db.connection()).list(filter)
    }

    /// Retained synced history.
    pub async fn history(&self) -> Result<Vec<QueuedTransfer>> {
        self.list(&TransferFilter::states(&[SyncState::Completed]))
            .await
    }

    /// Move a record along one allowed sync-state edge, recording `error`
    /// when the new state is `Failed`.
    pub async fn update_sync_state(
        &self,
        id: &TransferId,
        state: SyncState,
        error: Option<&str>,
    ) -> Result<QueuedTransfer> {
        let db = self.db.lock().await;
        let repo = SqliteTransferRepository::new(db.connection());

        let record = if state == SyncState::Failed {
            let current = repo.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))?;
            repo.mark_failed(
                id,
                &FailureUpdate {
                    error: error.unwrap_or("sync failed").to_string(),
                    retryable: current.retryable,
                    retry_count: current.retry_count,
                    next_attempt_at: current.next_attempt_at,
                },
            )?
        } else {
            repo.transition(id, state)?
        };

        tracing::debug!("Transfer {id} is now {state}");
        Ok(record)
    }

    /// `Syncing -> Failed` with full retry bookkeeping.
    pub async fn record_failure(
        &self,
        id: &TransferId,
        update: &FailureUpdate,
    ) -> Result<QueuedTransfer> {
        let db = self.db.lock().await;
        let record = SqliteTransferRepository::new(db.connection()).mark_failed(id, update)?;
        tracing::debug!(
            "Transfer {id} failed (attempt {}, retryable: {}): {}",
            update.retry_count,
            update.retryable,
            update.error
        );
        Ok(record)
    }

    /// Last local check before a commit request leaves the device.
    ///
    /// Runs under one lock so a concurrent [`Self::cancel`] lands either
    /// before (the record is dropped unsent) or after (the commit goes out
    /// and the server decides).
    pub async fn begin_commit(&self, id: &TransferId) -> Result<CommitStart> {
        let db = self.db.lock().await;
        let repo = SqliteTransferRepository::new(db.connection());

        let record = repo.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))?;
        if record.is_locally_cancelled() {
            repo.delete(id)?;
            tracing::info!("Transfer {id} cancelled before commit; not sent");
            return Ok(CommitStart::Cancelled);
        }

        repo.mark_commit_attempted(id)?;
        let record = repo.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(CommitStart::Send(Box::new(record)))
    }

    /// `Syncing -> Completed`, adopting the server's transfer.
    ///
    /// The row is deleted unless `retain` keeps it as synced history.
    pub async fn mark_completed(
        &self,
        id: &TransferId,
        server: &Transfer,
        retain: bool,
    ) -> Result<QueuedTransfer> {
        let db = self.db.lock().await;
        let repo = SqliteTransferRepository::new(db.connection());
        let record = repo.mark_completed(id, server)?;
        if !retain {
            repo.delete(id)?;
        }
        tracing::info!("Transfer {id} synced with status {}", server.status);
        Ok(record)
    }

    /// Cancel a queued transfer on this device.
    ///
    /// Only stops the commit if none has been sent yet; afterwards the
    /// server's answer decides the final status.
    pub async fn cancel(&self, id: &TransferId) -> Result<QueuedTransfer> {
        let db = self.db.lock().await;
        let repo = SqliteTransferRepository::new(db.connection());

        let record = repo.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))?;
        if record.sync_state == SyncState::Completed {
            return Err(Error::InvalidInput(format!(
                "transfer {id} is already synced and cannot be cancelled locally"
            )));
        }

        repo.request_cancel(id)?;
        tracing::info!("Transfer {id} cancelled locally");
        repo.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Dismiss a failed record that will not be retried.
    pub async fn acknowledge(&self, id: &TransferId) -> Result<()> {
        let db = self.db.lock().await;
        let repo = SqliteTransferRepository::new(db.connection());

        let record = repo.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))?;
        if !record.requires_attention() {
            return Err(Error::InvalidInput(format!(
                "transfer {id} is not awaiting acknowledgement"
            )));
        }
        repo.delete(id)?;
        tracing::info!("Transfer {id} acknowledged and removed");
        Ok(())
    }

    pub async fn remove(&self, id: &TransferId) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteTransferRepository::new(db.connection()).delete(id)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let db = self.db.lock().await;
        let mut stats = SqliteTransferRepository::new(db.connection()).stats()?;
        stats.last_sync_at = SqliteMetaRepository::new(db.connection()).last_sync_at()?;
        Ok(stats)
    }

    pub async fn last_sync_at(&self) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        SqliteMetaRepository::new(db.connection()).last_sync_at()
    }

    pub async fn set_last_sync_at(&self, at_ms: i64) -> Result<()> {
        let db = self.db.lock().await;
        SqliteMetaRepository::new(db.connection()).set_last_sync_at(at_ms)
    }
}
