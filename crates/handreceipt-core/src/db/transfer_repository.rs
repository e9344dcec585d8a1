//! Transfer queue repository implementation

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{
    QueueStats, QueuedTransfer, SyncState, Transfer, TransferFilter, TransferId, TransferStatus,
};

const SELECT_COLUMNS: &str = "SELECT seq, id, property_id, from_user_id, to_user_id, status,
        qr_code, signature, approved_at, created_at, updated_at, sync_state, retry_count,
        retryable, last_error, next_attempt_at, commit_attempted, enqueued_at, cancel_requested
     FROM transfers";

/// Bookkeeping written when a commit attempt fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureUpdate {
    pub error: String,
    pub retryable: bool,
    pub retry_count: u32,
    pub next_attempt_at: Option<i64>,
}

/// `SQLite` access to the `transfers` table.
///
/// Every method is a single statement or guarded by the caller's lock; the
/// async [`crate::services::TransferQueueStore`] is the only writer.
pub struct SqliteTransferRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteTransferRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a transfer, or update its data in place when the id is known.
    ///
    /// Queue bookkeeping (`seq`, sync state, retries) survives the update.
    pub fn upsert(&self, transfer: &Transfer, now_ms: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO transfers (
                id, property_id, from_user_id, to_user_id, status, qr_code, signature,
                approved_at, created_at, updated_at, sync_state, enqueued_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', ?11)
             ON CONFLICT(id) DO UPDATE SET
                property_id = excluded.property_id,
                from_user_id = excluded.from_user_id,
                to_user_id = excluded.to_user_id,
                status = excluded.status,
                qr_code = excluded.qr_code,
                signature = excluded.signature,
                approved_at = excluded.approved_at,
                updated_at = excluded.updated_at",
            params![
                transfer.id.as_str(),
                transfer.property_id,
                transfer.from_user_id,
                transfer.to_user_id,
                transfer.status.as_str(),
                transfer.qr_code,
                transfer.signature,
                transfer.approved_at.map(|at| at.timestamp_millis()),
                transfer.created_at.timestamp_millis(),
                transfer.updated_at.timestamp_millis(),
                now_ms,
            ],
        )?;
        Ok(())
    }

    /// Get a queued transfer by ID
    pub fn get(&self, id: &TransferId) -> Result<Option<QueuedTransfer>> {
        let record = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.as_str()],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    /// List records in enqueue order.
    ///
    /// Completed history is only returned when the filter asks for it.
    pub fn list(&self, filter: &TransferFilter) -> Result<Vec<QueuedTransfer>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE (?1 IS NULL OR property_id = ?1)
             ORDER BY seq ASC"
        ))?;

        let include_completed = filter.sync_states.contains(&SyncState::Completed);
        let records = stmt
            .query_map(params![filter.property_id], Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .filter(|record| include_completed || record.sync_state != SyncState::Completed)
            .filter(|record| filter.matches(record))
            .collect();

        Ok(records)
    }

    /// Count records that are not completed history.
    pub fn count_active(&self) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM transfers WHERE sync_state != 'completed'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Move a record along one edge of the sync-state machine.
    pub fn transition(&self, id: &TransferId, next: SyncState) -> Result<QueuedTransfer> {
        let current = self
            .get(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        // A failure that will not be retried stays put until acknowledged.
        let revives_terminal = current.sync_state == SyncState::Failed
            && next == SyncState::Pending
            && !current.retryable;
        if !current.sync_state.can_transition_to(next) || revives_terminal {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                from: current.sync_state,
                to: next,
            });
        }

        self.conn.execute(
            "UPDATE transfers
             SET sync_state = ?1,
                 next_attempt_at = CASE WHEN ?1 = 'pending' THEN NULL ELSE next_attempt_at END
             WHERE id = ?2 AND sync_state = ?3",
            params![next.as_str(), id.as_str(), current.sync_state.as_str()],
        )?;

        self.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// `Syncing -> Failed` with retry bookkeeping.
    pub fn mark_failed(&self, id: &TransferId, update: &FailureUpdate) -> Result<QueuedTransfer> {
        let tx = self.conn.unchecked_transaction()?;
        self.transition(id, SyncState::Failed)?;
        tx.execute(
            "UPDATE transfers
             SET last_error = ?1, retryable = ?2, retry_count = ?3, next_attempt_at = ?4
             WHERE id = ?5",
            params![
                update.error,
                update.retryable,
                update.retry_count,
                update.next_attempt_at,
                id.as_str(),
            ],
        )?;
        tx.commit()?;
        self.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// `Syncing -> Completed`, adopting the server's copy of the transfer.
    pub fn mark_completed(&self, id: &TransferId, server: &Transfer) -> Result<QueuedTransfer> {
        let tx = self.conn.unchecked_transaction()?;
        self.transition(id, SyncState::Completed)?;
        tx.execute(
            "UPDATE transfers
             SET status = ?1, approved_at = ?2, updated_at = ?3, qr_code = COALESCE(?4, qr_code),
                 signature = COALESCE(?5, signature), last_error = NULL, next_attempt_at = NULL
             WHERE id = ?6",
            params![
                server.status.as_str(),
                server.approved_at.map(|at| at.timestamp_millis()),
                server.updated_at.timestamp_millis(),
                server.qr_code,
                server.signature,
                id.as_str(),
            ],
        )?;
        tx.commit()?;
        self.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub fn mark_commit_attempted(&self, id: &TransferId) -> Result<()> {
        self.conn.execute(
            "UPDATE transfers SET commit_attempted = 1 WHERE id = ?1",
            params![id.as_str()],
        )?;
        Ok(())
    }

    /// Flag a local cancel without touching the transfer payload.
    pub fn request_cancel(&self, id: &TransferId) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE transfers SET cancel_requested = 1 WHERE id = ?1",
            params![id.as_str()],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn delete(&self, id: &TransferId) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM transfers WHERE id = ?1", params![id.as_str()])?;
        Ok(rows > 0)
    }

    /// Records left in `Syncing` by a crash become retryable failures.
    pub fn recover_interrupted(&self, now_ms: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE transfers
             SET sync_state = 'failed', retryable = 1, next_attempt_at = ?1,
                 last_error = 'interrupted before the server responded'
             WHERE sync_state = 'syncing'",
            params![now_ms],
        )?;
        Ok(rows)
    }

    pub fn stats(&self) -> Result<QueueStats> {
        let mut stats = QueueStats::default();
        let mut stmt = self.conn.prepare(
            "SELECT sync_state, retryable, COUNT(*) FROM transfers GROUP BY sync_state, retryable",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, usize>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for (state, retryable, count) in rows {
            match state.as_str() {
                "pending" => stats.pending += count,
                "syncing" => stats.syncing += count,
                "failed" => {
                    stats.failed += count;
                    if !retryable {
                        stats.requires_attention += count;
                    }
                }
                "completed" => stats.completed_history += count,
                _ => {}
            }
        }
        stats.total = stats.pending + stats.syncing + stats.failed;
        Ok(stats)
    }

    /// Parse a queued transfer from a database row
    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedTransfer> {
        let id: String = row.get(1)?;
        let status: String = row.get(5)?;
        let sync_state: String = row.get(11)?;

        let transfer = Transfer {
            id: id.parse().map_err(|error| conversion_error(1, error))?,
            property_id: row.get(2)?,
            from_user_id: row.get(3)?,
            to_user_id: row.get(4)?,
            status: status
                .parse::<TransferStatus>()
                .map_err(|error| conversion_error(5, error))?,
            qr_code: row.get(6)?,
            signature: row.get(7)?,
            approved_at: row
                .get::<_, Option<i64>>(8)?
                .map(|ms| millis_to_datetime(8, ms))
                .transpose()?,
            created_at: millis_to_datetime(9, row.get(9)?)?,
            updated_at: millis_to_datetime(10, row.get(10)?)?,
        };

        Ok(QueuedTransfer {
            transfer,
            sync_state: sync_state
                .parse::<SyncState>()
                .map_err(|error| conversion_error(11, error))?,
            retry_count: row.get(12)?,
            retryable: row.get(13)?,
            last_error: row.get(14)?,
            next_attempt_at: row.get(15)?,
            commit_attempted: row.get(16)?,
            enqueued_at: row.get(17)?,
            cancel_requested: row.get(18)?,
            seq: row.get(0)?,
        })
    }
}

fn millis_to_datetime(index: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| conversion_error(index, format!("timestamp {ms} out of range")))
}

fn conversion_error(index: usize, error: impl ToString) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, error.to_string().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_upsert_and_get() {
        let db = setup();
        let repo = SqliteTransferRepository::new(db.connection());

        let transfer = Transfer::new("P1", "alice", "bob");
        repo.upsert(&transfer, 10).unwrap();

        let record = repo.get(&transfer.id).unwrap().unwrap();
        assert_eq!(record.transfer.id, transfer.id);
        assert_eq!(record.transfer.property_id, "P1");
        assert_eq!(record.sync_state, SyncState::Pending);
        assert_eq!(record.enqueued_at, 10);
        assert!(record.retryable);
    }

    #[test]
    fn test_upsert_same_id_updates_in_place() {
        let db = setup();
        let repo = SqliteTransferRepository::new(db.connection());

        let mut transfer = Transfer::new("P1", "alice", "bob");
        repo.upsert(&transfer, 10).unwrap();
        let first = repo.get(&transfer.id).unwrap().unwrap();

        transfer.to_user_id = "carol".to_string();
        repo.upsert(&transfer, 20).unwrap();

        let records = repo.list(&TransferFilter::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].transfer.to_user_id, "carol");
        assert_eq!(records[0].seq, first.seq);
        assert_eq!(records[0].enqueued_at, 10);
    }

    #[test]
    fn test_list_keeps_enqueue_order() {
        let db = setup();
        let repo = SqliteTransferRepository::new(db.connection());

        let first = Transfer::new("P1", "alice", "bob");
        let second = Transfer::new("P2", "alice", "bob");
        let third = Transfer::new("P1", "bob", "carol");
        for transfer in [&first, &second, &third] {
            repo.upsert(transfer, 0).unwrap();
        }

        let ids: Vec<_> = repo
            .list(&TransferFilter::property("P1"))
            .unwrap()
            .into_iter()
            .map(|record| record.transfer.id)
            .collect();
        assert_eq!(ids, vec![first.id, third.id]);
    }

    #[test]
    fn test_transition_rejects_undefined_edges() {
        let db = setup();
        let repo = SqliteTransferRepository::new(db.connection());

        let transfer = Transfer::new("P1", "alice", "bob");
        repo.upsert(&transfer, 0).unwrap();

        let error = repo.transition(&transfer.id, SyncState::Completed).unwrap_err();
        assert!(matches!(
            error,
            Error::InvalidTransition {
                from: SyncState::Pending,
                to: SyncState::Completed,
                ..
            }
        ));

        repo.transition(&transfer.id, SyncState::Syncing).unwrap();
        assert!(repo.transition(&transfer.id, SyncState::Syncing).is_err());
    }

    #[test]
    fn test_terminal_failure_cannot_return_to_pending() {
        let db = setup();
        let repo = SqliteTransferRepository::new(db.connection());

        let transfer = Transfer::new("P1", "alice", "bob");
        repo.upsert(&transfer, 0).unwrap();
        repo.transition(&transfer.id, SyncState::Syncing).unwrap();
        repo.mark_failed(
            &transfer.id,
            &FailureUpdate {
                error: "forbidden (403)".to_string(),
                retryable: false,
                retry_count: 1,
                next_attempt_at: None,
            },
        )
        .unwrap();

        let error = repo.transition(&transfer.id, SyncState::Pending).unwrap_err();
        assert!(matches!(
            error,
            Error::InvalidTransition {
                from: SyncState::Failed,
                to: SyncState::Pending,
                ..
            }
        ));
        let record = repo.get(&transfer.id).unwrap().unwrap();
        assert!(record.requires_attention());
    }

    #[test]
    fn test_mark_failed_rolls_back_on_bad_edge() {
        let db = setup();
        let repo = SqliteTransferRepository::new(db.connection());

        let transfer = Transfer::new("P1", "alice", "bob");
        repo.upsert(&transfer, 0).unwrap();

        let update = FailureUpdate {
            error: "timeout".to_string(),
            retryable: true,
            retry_count: 4,
            next_attempt_at: Some(100),
        };
        assert!(repo.mark_failed(&transfer.id, &update).is_err());

        let record = repo.get(&transfer.id).unwrap().unwrap();
        assert_eq!(record.sync_state, SyncState::Pending);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.last_error, None);
    }

    #[test]
    fn test_request_cancel_keeps_payload() {
        let db = setup();
        let repo = SqliteTransferRepository::new(db.connection());

        let transfer = Transfer::new("P1", "alice", "bob");
        repo.upsert(&transfer, 0).unwrap();
        repo.request_cancel(&transfer.id).unwrap();

        let record = repo.get(&transfer.id).unwrap().unwrap();
        assert!(record.cancel_requested);
        assert_eq!(record.transfer.status, transfer.status);
        assert!(repo.request_cancel(&TransferId::new()).is_err());
    }

    #[test]
    fn test_completed_records_hidden_from_default_list() {
        let db = setup();
        let repo = SqliteTransferRepository::new(db.connection());

        let transfer = Transfer::new("P1", "alice", "bob");
        repo.upsert(&transfer, 0).unwrap();
        repo.transition(&transfer.id, SyncState::Syncing).unwrap();

        let mut server = transfer.clone();
        server.status = TransferStatus::Approved;
        let record = repo.mark_completed(&transfer.id, &server).unwrap();
        assert_eq!(record.transfer.status, TransferStatus::Approved);

        assert!(repo.list(&TransferFilter::default()).unwrap().is_empty());
        let history = repo
            .list(&TransferFilter::states(&[SyncState::Completed]))
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(repo.count_active().unwrap(), 0);
    }

    #[test]
    fn test_recover_interrupted_marks_failed() {
        let db = setup();
        let repo = SqliteTransferRepository::new(db.connection());

        let transfer = Transfer::new("P1", "alice", "bob");
        repo.upsert(&transfer, 0).unwrap();
        repo.transition(&transfer.id, SyncState::Syncing).unwrap();

        assert_eq!(repo.recover_interrupted(500).unwrap(), 1);
        let record = repo.get(&transfer.id).unwrap().unwrap();
        assert_eq!(record.sync_state, SyncState::Failed);
        assert!(record.retryable);
        assert_eq!(record.next_attempt_at, Some(500));
    }

    #[test]
    fn test_stats_counts_states() {
        let db = setup();
        let repo = SqliteTransferRepository::new(db.connection());

        let pending = Transfer::new("P1", "alice", "bob");
        let failed = Transfer::new("P2", "alice", "bob");
        repo.upsert(&pending, 0).unwrap();
        repo.upsert(&failed, 0).unwrap();
        repo.transition(&failed.id, SyncState::Syncing).unwrap();
        repo.mark_failed(
            &failed.id,
            &FailureUpdate {
                error: "rejected".to_string(),
                retryable: false,
                retry_count: 1,
                next_attempt_at: None,
            },
        )
        .unwrap();

        let stats = repo.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.requires_attention, 1);
    }
}
