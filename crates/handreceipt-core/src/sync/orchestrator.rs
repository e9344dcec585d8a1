//! Drains queued transfers and offline requests.

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::watch;

use super::backoff::next_attempt_at;
use super::report::{SyncReport, TransferOutcome, TransferReport};
use super::single_flight::SingleFlight;
use super::{SyncError, SyncResult};
use crate::api::{ApiError, ApiResult, FailureKind, TransferApi};
use crate::auth::TokenSource;
use crate::config::SyncConfig;
use crate::db::FailureUpdate;
use crate::models::{
    HttpMethod, OfflineRequest, QueuedTransfer, ScanResult, SyncState, Transfer, TransferFilter,
    TransferId,
};
use crate::network::{Connectivity, SyncTarget};
use crate::services::{CommitStart, OfflineRequestQueue, TransferQueueStore};
use crate::util::unix_millis_now;

/// What [`SyncOrchestrator::submit_request`] did with a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Sent,
    Queued(OfflineRequest),
}

/// One app session's sync engine.
///
/// Owns the only write path from the network into the stores. Drains are
/// single-flight: concurrent triggers await the pass already running.
pub struct SyncOrchestrator<A, T> {
    queue: TransferQueueStore,
    requests: OfflineRequestQueue,
    api: A,
    tokens: T,
    config: SyncConfig,
    connectivity: watch::Receiver<Connectivity>,
    flight: SingleFlight<SyncResult<SyncReport>>,
}

impl<A: TransferApi, T: TokenSource> SyncOrchestrator<A, T> {
    pub fn new(
        queue: TransferQueueStore,
        requests: OfflineRequestQueue,
        api: A,
        tokens: T,
        config: SyncConfig,
        connectivity: watch::Receiver<Connectivity>,
    ) -> Self {
        Self {
            queue,
            requests,
            api,
            tokens,
            config,
            connectivity,
            flight: SingleFlight::default(),
        }
    }

    pub const fn queue(&self) -> &TransferQueueStore {
        &self.queue
    }

    pub const fn requests(&self) -> &OfflineRequestQueue {
        &self.requests
    }

    pub fn is_online(&self) -> bool {
        *self.connectivity.borrow() == Connectivity::Online
    }

    /// Run a drain pass, or await the one already in progress.
    pub async fn drain(&self) -> SyncResult<SyncReport> {
        self.flight.run(|| self.drain_once()).await
    }

    /// Queue a verified scan as a transfer to `to_user_id`.
    pub async fn enqueue_scan(
        &self,
        scan: &ScanResult,
        to_user_id: &str,
    ) -> SyncResult<QueuedTransfer> {
        Ok(self.queue.enqueue(&Transfer::from_scan(scan, to_user_id)).await?)
    }

    pub async fn cancel(&self, id: &TransferId) -> SyncResult<QueuedTransfer> {
        Ok(self.queue.cancel(id).await?)
    }

    pub async fn acknowledge(&self, id: &TransferId) -> SyncResult<()> {
        Ok(self.queue.acknowledge(id).await?)
    }

    /// Send a generic mutation now, or queue it for the next pass.
    ///
    /// Requests go to the queue whenever older ones are still waiting so
    /// submission order is preserved.
    pub async fn submit_request(
        &self,
        method: HttpMethod,
        endpoint: &str,
        data: Option<serde_json::Value>,
    ) -> SyncResult<SubmitOutcome> {
        if !self.is_online() || !self.requests.is_empty().await? {
            let queued = self.requests.push(method, endpoint, data).await?;
            return Ok(SubmitOutcome::Queued(queued));
        }

        let request = OfflineRequest {
            id: uuid::Uuid::now_v7().to_string(),
            method,
            endpoint: endpoint.trim().to_string(),
            data,
            created_at: unix_millis_now(),
            seq: 0,
        };
        let mut token = self.tokens.access_token().await?;
        let result = self
            .authorized(&mut token, |token| {
                let api = &self.api;
                let request = &request;
                async move { api.replay(&token, request).await }
            })
            .await;

        match result {
            Ok(()) => Ok(SubmitOutcome::Sent),
            Err(error) if error.kind() == FailureKind::Transient => {
                tracing::debug!("Direct send failed ({error}); queueing {method} {endpoint}");
                let queued = self
                    .requests
                    .push(method, endpoint, request.data)
                    .await?;
                Ok(SubmitOutcome::Queued(queued))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// `GET /transfers/{id}`
    pub async fn fetch_transfer(&self, id: &TransferId) -> SyncResult<Transfer> {
        let mut token = self.online_token().await?;
        Ok(self
            .authorized(&mut token, |token| {
                let api = &self.api;
                async move { api.get_transfer(&token, id).await }
            })
            .await?)
    }

    /// `POST /transfers/{id}/approve`
    pub async fn approve(&self, id: &TransferId) -> SyncResult<Transfer> {
        let mut token = self.online_token().await?;
        Ok(self
            .authorized(&mut token, |token| {
                let api = &self.api;
                async move { api.approve(&token, id).await }
            })
            .await?)
    }

    /// Ask the server to check a scanned token as well.
    pub async fn scan_on_server(&self, raw: &str) -> SyncResult<Transfer> {
        let mut token = self.online_token().await?;
        Ok(self
            .authorized(&mut token, |token| {
                let api = &self.api;
                async move { api.scan_qr(&token, raw).await }
            })
            .await?)
    }

    pub async fn list_pending(&self) -> SyncResult<Vec<Transfer>> {
        let mut token = self.online_token().await?;
        Ok(self
            .authorized(&mut token, |token| {
                let api = &self.api;
                async move { api.list_pending(&token).await }
            })
            .await?)
    }

    pub async fn list_for_property(&self, property_id: &str) -> SyncResult<Vec<Transfer>> {
        let mut token = self.online_token().await?;
        Ok(self
            .authorized(&mut token, |token| {
                let api = &self.api;
                async move { api.list_for_property(&token, property_id).await }
            })
            .await?)
    }

    async fn online_token(&self) -> SyncResult<String> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }
        Ok(self.tokens.access_token().await?)
    }

    async fn drain_once(&self) -> SyncResult<SyncReport> {
        let started_at = unix_millis_now();
        if !self.is_online() {
            tracing::debug!("Skipping drain while offline");
            return Ok(SyncReport::offline(started_at));
        }

        // Single-flight means no other pass owns these; they were left by
        // a pass that was dropped or hit a storage error mid-commit.
        self.queue.recover_interrupted().await?;

        let mut token = self.tokens.access_token().await?;
        tracing::info!("Starting sync pass");

        let mut report = SyncReport {
            started_at,
            ..SyncReport::default()
        };

        let records = self
            .queue
            .list(&TransferFilter::states(&[SyncState::Pending, SyncState::Failed]))
            .await?;
        for group in group_by_property(records) {
            self.drain_group(group, &mut token, &mut report).await?;
        }

        self.replay_requests(&mut token, &mut report).await?;

        let finished_at = unix_millis_now();
        report.next_retry_at = self.earliest_retry().await?;
        report.finished_at = finished_at;
        self.queue.set_last_sync_at(finished_at).await?;

        tracing::info!(
            "Sync pass finished: {} transfer(s) handled, {} request(s) replayed",
            report.transfers.len(),
            report.requests_replayed
        );
        Ok(report)
    }

    /// Commit one property's transfers strictly in enqueue order.
    async fn drain_group(
        &self,
        group: Vec<QueuedTransfer>,
        token: &mut String,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let mut blocked = false;

        for record in group {
            if record.requires_attention() {
                continue;
            }

            let outcome = if blocked {
                TransferOutcome::Deferred
            } else if !record.is_eligible(unix_millis_now()) {
                blocked = true;
                TransferOutcome::Deferred
            } else {
                let outcome = self.commit(&record, token).await?;
                blocked = matches!(outcome, TransferOutcome::RetryScheduled { .. });
                outcome
            };

            report.transfers.push(TransferReport {
                id: record.transfer.id,
                property_id: record.transfer.property_id,
                outcome,
            });
        }

        Ok(())
    }

    async fn commit(&self, record: &QueuedTransfer, token: &mut String) -> SyncResult<TransferOutcome> {
        let id = record.transfer.id;

        if record.sync_state == SyncState::Failed {
            self.queue
                .update_sync_state(&id, SyncState::Pending, None)
                .await?;
        }
        self.queue
            .update_sync_state(&id, SyncState::Syncing, None)
            .await?;

        // The user may have cancelled since the record was listed.
        let current = match self.queue.begin_commit(&id).await? {
            CommitStart::Cancelled => return Ok(TransferOutcome::Cancelled),
            CommitStart::Send(current) => current,
        };
        let transfer = &current.transfer;
        let result = self
            .authorized(token, |token| {
                let api = &self.api;
                async move { api.create_transfer(&token, transfer).await }
            })
            .await;

        match result {
            Ok(server) => {
                self.queue
                    .mark_completed(&id, &server, self.config.retain_history)
                    .await?;
                Ok(TransferOutcome::Completed {
                    status: server.status,
                })
            }
            Err(error) => self.record_failure(&current, &error).await,
        }
    }

    async fn record_failure(
        &self,
        record: &QueuedTransfer,
        error: &ApiError,
    ) -> SyncResult<TransferOutcome> {
        let id = record.transfer.id;
        let attempt = record.retry_count.saturating_add(1);
        let reason = error.to_string();
        let now = unix_millis_now();

        let retry_at = match error.kind() {
            FailureKind::Transient if attempt < self.config.max_attempts => {
                Some(next_attempt_at(&self.config, attempt, now))
            }
            _ => None,
        };

        self.queue
            .record_failure(
                &id,
                &FailureUpdate {
                    error: reason.clone(),
                    retryable: retry_at.is_some(),
                    retry_count: attempt,
                    next_attempt_at: retry_at,
                },
            )
            .await?;

        if let Some(next_attempt_at) = retry_at {
            tracing::warn!("Transfer {id} attempt {attempt} failed, retrying later: {reason}");
            Ok(TransferOutcome::RetryScheduled {
                attempt,
                next_attempt_at,
            })
        } else {
            tracing::warn!("Transfer {id} needs attention after attempt {attempt}: {reason}");
            Ok(TransferOutcome::Failed {
                reason,
                retryable: false,
            })
        }
    }

    /// Replay queued requests in order, stopping at the first failure.
    async fn replay_requests(&self, token: &mut String, report: &mut SyncReport) -> SyncResult<()> {
        let pending = self.requests.list().await?;
        let total = pending.len();

        for request in &pending {
            let result = self
                .authorized(token, |token| {
                    let api = &self.api;
                    async move { api.replay(&token, request).await }
                })
                .await;

            match result {
                Ok(()) => {
                    self.requests.remove(&request.id).await?;
                    report.requests_replayed += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        "Replay of {} {} failed; keeping it and {} later request(s): {error}",
                        request.method,
                        request.endpoint,
                        total - report.requests_replayed - 1
                    );
                    report.request_error = Some(error.to_string());
                    break;
                }
            }
        }

        report.requests_remaining = total - report.requests_replayed;
        Ok(())
    }

    /// Call the API with a deadline, refreshing the token once on `401`.
    ///
    /// A second `401`, or a failed refresh, comes back as a permanent
    /// rejection.
    async fn authorized<R, F, Fut>(&self, token: &mut String, call: F) -> ApiResult<R>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = ApiResult<R>>,
    {
        match self.with_deadline(call(token.clone())).await {
            Err(ApiError::Unauthorized(message)) => {
                tracing::info!("Access token rejected ({message}); refreshing once");
                let refreshed = self.tokens.refresh().await.map_err(|error| {
                    ApiError::Rejected {
                        status: 401,
                        message: format!("token refresh failed: {error}"),
                    }
                })?;
                token.clone_from(&refreshed);

                match self.with_deadline(call(refreshed)).await {
                    Err(ApiError::Unauthorized(message)) => Err(ApiError::Rejected {
                        status: 401,
                        message,
                    }),
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn with_deadline<R>(&self, call: impl Future<Output = ApiResult<R>>) -> ApiResult<R> {
        tokio::time::timeout(self.config.request_timeout(), call)
            .await
            .unwrap_or(Err(ApiError::Timeout))
    }

    async fn earliest_retry(&self) -> SyncResult<Option<i64>> {
        Ok(self
            .queue
            .list(&TransferFilter::states(&[SyncState::Failed]))
            .await?
            .iter()
            .filter(|record| record.retryable)
            .filter_map(|record| record.next_attempt_at)
            .min())
    }
}

impl<A, T> SyncTarget for SyncOrchestrator<A, T>
where
    A: TransferApi + 'static,
    T: TokenSource + 'static,
{
    async fn drain(&self) -> SyncResult<SyncReport> {
        Self::drain(self).await
    }
}

/// Split records into per-property groups, each in enqueue order.
fn group_by_property(records: Vec<QueuedTransfer>) -> Vec<Vec<QueuedTransfer>> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<QueuedTransfer>> = HashMap::new();

    for record in records {
        let property = record.transfer.property_id.clone();
        if !groups.contains_key(&property) {
            order.push(property.clone());
        }
        groups.entry(property).or_default().push(record);
    }

    order
        .into_iter()
        .filter_map(|property| groups.remove(&property))
        .map(|mut group| {
            group.sort_by_key(|record| record.seq);
            group
        })
        .collect()
}
