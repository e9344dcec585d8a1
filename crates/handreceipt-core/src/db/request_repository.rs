//! Offline request queue repository implementation

use rusqlite::types::Type;
use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::{HttpMethod, OfflineRequest};

pub struct SqliteRequestRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRequestRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Append a request and return it with its assigned sequence number.
    pub fn push(
        &self,
        id: &str,
        method: HttpMethod,
        endpoint: &str,
        data: Option<&serde_json::Value>,
        now_ms: i64,
    ) -> Result<OfflineRequest> {
        let encoded = data.map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "INSERT INTO offline_requests (id, method, endpoint, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, method.as_str(), endpoint, encoded, now_ms],
        )?;

        Ok(OfflineRequest {
            id: id.to_string(),
            method,
            endpoint: endpoint.to_string(),
            data: data.cloned(),
            created_at: now_ms,
            seq: self.conn.last_insert_rowid(),
        })
    }

    /// All queued requests in submission order.
    pub fn list(&self) -> Result<Vec<OfflineRequest>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, id, method, endpoint, data, created_at
             FROM offline_requests
             ORDER BY seq ASC",
        )?;
        let requests = stmt
            .query_map([], Self::parse_request)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(requests)
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM offline_requests WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn len(&self) -> Result<usize> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM offline_requests", [], |row| row.get(0))?;
        Ok(count)
    }

    fn parse_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<OfflineRequest> {
        let method: String = row.get(2)?;
        let data: Option<String> = row.get(4)?;

        Ok(OfflineRequest {
            seq: row.get(0)?,
            id: row.get(1)?,
            method: method.parse().map_err(|error: String| {
                rusqlite::Error::FromSqlConversionFailure(2, Type::Text, error.into())
            })?,
            endpoint: row.get(3)?,
            data: data
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .map_err(|error| {
                    rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(error))
                })?,
            created_at: row.get(5)?,
        })
    }
}
