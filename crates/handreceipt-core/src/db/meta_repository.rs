//! Key/value sync metadata

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

const LAST_SYNC_AT: &str = "last_sync_at";

pub struct SqliteMetaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMetaRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Unix ms of the last finished drain, if any.
    pub fn last_sync_at(&self) -> Result<Option<i64>> {
        Ok(self
            .get(LAST_SYNC_AT)?
            .and_then(|value| value.parse::<i64>().ok()))
    }

    pub fn set_last_sync_at(&self, at_ms: i64) -> Result<()> {
        self.set(LAST_SYNC_AT, &at_ms.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_last_sync_at_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteMetaRepository::new(db.connection());

        assert_eq!(repo.last_sync_at().unwrap(), None);
        repo.set_last_sync_at(42).unwrap();
        repo.set_last_sync_at(43).unwrap();
        assert_eq!(repo.last_sync_at().unwrap(), Some(43));
    }
}
