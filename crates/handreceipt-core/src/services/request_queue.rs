//! Durable FIFO of generic mutations made while offline.

use crate::db::{SharedDatabase, SqliteRequestRepository};
use crate::models::{HttpMethod, OfflineRequest};
use crate::util::unix_millis_now;
use crate::{Error, Result};

#[derive(Clone)]
pub struct OfflineRequestQueue {
    db: SharedDatabase,
}

impl OfflineRequestQueue {
    pub const fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Append a mutation; it is replayed after everything queued before it.
    pub async fn push(
        &self,
        method: HttpMethod,
        endpoint: &str,
        data: Option<serde_json::Value>,
    ) -> Result<OfflineRequest> {
        let endpoint = endpoint.trim();
        if !endpoint.starts_with('/') {
            return Err(Error::InvalidInput(format!(
                "endpoint '{endpoint}' must start with '/'"
            )));
        }

        let id = uuid::Uuid::now_v7().to_string();
        let db = self.db.lock().await;
        let request = SqliteRequestRepository::new(db.connection()).push(
            &id,
            method,
            endpoint,
            data.as_ref(),
            unix_millis_now(),
        )?;
        tracing::info!("Queued offline {} {}", request.method, request.endpoint);
        Ok(request)
    }

    pub async fn list(&self) -> Result<Vec<OfflineRequest>> {
        let db = self.db.lock().await;
        SqliteRequestRepository::new(db.connection()).list()
    }

    /// Drop a request after it was replayed successfully.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteRequestRepository::new(db.connection()).remove(id)
    }

    pub async fn len(&self) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteRequestRepository::new(db.connection()).len()
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    #[tokio::test]
    async fn requests_keep_submission_order() {
        let queue = OfflineRequestQueue::new(Database::open_in_memory().unwrap().into_shared());
        queue
            .push(HttpMethod::Post, "/properties/P1/notes", Some(json!({"text": "a"})))
            .await
            .unwrap();
        queue
            .push(HttpMethod::Patch, "/properties/P1", Some(json!({"location": "B2"})))
            .await
            .unwrap();

        let requests = queue.list().await.unwrap();
        let endpoints: Vec<_> = requests.iter().map(|r| r.endpoint.as_str()).collect();
        assert_eq!(endpoints, vec!["/properties/P1/notes", "/properties/P1"]);

        queue.remove(&requests[0].id).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rejects_relative_endpoint() {
        let queue = OfflineRequestQueue::new(Database::open_in_memory().unwrap().into_shared());
        assert!(queue.push(HttpMethod::Delete, "notes/1", None).await.is_err());
        assert!(queue.is_empty().await.unwrap());
    }
}
