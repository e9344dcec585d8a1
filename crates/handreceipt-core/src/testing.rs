//! In-memory fakes for the engine's collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::api::{ApiError, ApiResult, TransferApi};
use crate::auth::{AuthError, AuthResult, TokenSource};
use crate::models::{OfflineRequest, ScanResult, Transfer, TransferId, TransferStatus};
use crate::verifier::{TokenCapability, VerificationError};

/// Scripted answer for one `create_transfer` or `replay` call.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Store the transfer (once per id) with this status and answer.
    Accept(TransferStatus),
    Fail(ApiError),
    /// Store the transfer but never answer, as if the response was lost.
    ApplyThenHang,
    /// Answer after a delay.
    Delay(Duration, TransferStatus),
}

#[derive(Default)]
struct FakeApiState {
    commit_script: VecDeque<Scripted>,
    replay_script: VecDeque<Result<(), ApiError>>,
    commits: Vec<Transfer>,
    stored: HashMap<TransferId, Transfer>,
    replays: Vec<String>,
    tokens_seen: Vec<String>,
}

/// Server double that is idempotent on transfer id.
#[derive(Clone, Default)]
pub struct FakeApi {
    state: Arc<Mutex<FakeApiState>>,
    accepted_token: Option<String>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `401` to any token other than `token`.
    pub fn requiring_token(token: &str) -> Self {
        Self {
            accepted_token: Some(token.to_string()),
            ..Self::default()
        }
    }

    pub fn script_commit(&self, answer: Scripted) {
        self.state.lock().unwrap().commit_script.push_back(answer);
    }

    pub fn script_replay(&self, answer: Result<(), ApiError>) {
        self.state.lock().unwrap().replay_script.push_back(answer);
    }

    /// Ids of every commit request received, in order.
    pub fn commits(&self) -> Vec<TransferId> {
        self.state
            .lock()
            .unwrap()
            .commits
            .iter()
            .map(|transfer| transfer.id)
            .collect()
    }

    /// Status carried in each commit body sent for `id`.
    pub fn committed_statuses(&self, id: &TransferId) -> Vec<TransferStatus> {
        self.state
            .lock()
            .unwrap()
            .commits
            .iter()
            .filter(|transfer| transfer.id == *id)
            .map(|transfer| transfer.status)
            .collect()
    }

    /// Number of distinct transfers the server holds.
    pub fn stored_count(&self) -> usize {
        self.state.lock().unwrap().stored.len()
    }

    /// Endpoints of successfully replayed requests, in order.
    pub fn replays(&self) -> Vec<String> {
        self.state.lock().unwrap().replays.clone()
    }

    fn check_token(&self, token: &str) -> ApiResult<()> {
        self.state
            .lock()
            .unwrap()
            .tokens_seen
            .push(token.to_string());
        match &self.accepted_token {
            Some(accepted) if accepted != token => {
                Err(ApiError::Unauthorized("token expired (401)".to_string()))
            }
            _ => Ok(()),
        }
    }

    fn store(&self, transfer: &Transfer, status: TransferStatus) -> Transfer {
        let mut state = self.state.lock().unwrap();
        state
            .stored
            .entry(transfer.id)
            .or_insert_with(|| {
                let mut stored = transfer.clone();
                stored.status = status;
                stored.updated_at = Utc::now();
                if status == TransferStatus::Approved {
                    stored.approved_at = Some(stored.updated_at);
                }
                stored
            })
            .clone()
    }

    fn stored(&self, id: &TransferId) -> ApiResult<Transfer> {
        self.state
            .lock()
            .unwrap()
            .stored
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::Rejected {
                status: 404,
                message: format!("transfer {id} not found (404)"),
            })
    }
}

impl TransferApi for FakeApi {
    async fn create_transfer(&self, token: &str, transfer: &Transfer) -> ApiResult<Transfer> {
        self.check_token(token)?;
        let answer = {
            let mut state = self.state.lock().unwrap();
            state.commits.push(transfer.clone());
            state
                .commit_script
                .pop_front()
                .unwrap_or(Scripted::Accept(TransferStatus::Approved))
        };

        match answer {
            Scripted::Accept(status) => Ok(self.store(transfer, status)),
            Scripted::Fail(error) => Err(error),
            Scripted::ApplyThenHang => {
                self.store(transfer, TransferStatus::Approved);
                std::future::pending::<()>().await;
                Err(ApiError::Timeout)
            }
            Scripted::Delay(delay, status) => {
                tokio::time::sleep(delay).await;
                Ok(self.store(transfer, status))
            }
        }
    }

    async fn get_transfer(&self, token: &str, id: &TransferId) -> ApiResult<Transfer> {
        self.check_token(token)?;
        self.stored(id)
    }

    async fn approve(&self, token: &str, id: &TransferId) -> ApiResult<Transfer> {
        self.check_token(token)?;
        let mut state = self.state.lock().unwrap();
        let transfer = state.stored.get_mut(id).ok_or_else(|| ApiError::Rejected {
            status: 404,
            message: format!("transfer {id} not found (404)"),
        })?;
        transfer.status = TransferStatus::Approved;
        transfer.approved_at = Some(Utc::now());
        Ok(transfer.clone())
    }

    async fn scan_qr(&self, token: &str, raw: &str) -> ApiResult<Transfer> {
        self.check_token(token)?;
        let scan: ScanResult = serde_json::from_str(raw)
            .map_err(|error| ApiError::Rejected {
                status: 400,
                message: error.to_string(),
            })?;
        Ok(Transfer::from_scan(&scan, "server-user"))
    }

    async fn list_pending(&self, token: &str) -> ApiResult<Vec<Transfer>> {
        self.check_token(token)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .stored
            .values()
            .filter(|transfer| transfer.status == TransferStatus::Pending)
            .cloned()
            .collect())
    }

    async fn list_for_property(&self, token: &str, property_id: &str) -> ApiResult<Vec<Transfer>> {
        self.check_token(token)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .stored
            .values()
            .filter(|transfer| transfer.property_id == property_id)
            .cloned()
            .collect())
    }

    async fn replay(&self, token: &str, request: &OfflineRequest) -> ApiResult<()> {
        self.check_token(token)?;
        let mut state = self.state.lock().unwrap();
        let answer = state.replay_script.pop_front().unwrap_or(Ok(()));
        if answer.is_ok() {
            state.replays.push(request.endpoint.clone());
        }
        answer
    }
}

/// Token source with a scripted refresh.
pub struct FakeTokens {
    current: Mutex<String>,
    refreshed: Option<String>,
    refreshes: AtomicUsize,
}

impl FakeTokens {
    pub fn fixed(token: &str) -> Self {
        Self {
            current: Mutex::new(token.to_string()),
            refreshed: None,
            refreshes: AtomicUsize::new(0),
        }
    }

    /// Starts with `stale` and refreshes to `fresh`.
    pub fn refreshing(stale: &str, fresh: &str) -> Self {
        Self {
            refreshed: Some(fresh.to_string()),
            ..Self::fixed(stale)
        }
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl TokenSource for FakeTokens {
    async fn access_token(&self) -> AuthResult<String> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn refresh(&self) -> AuthResult<String> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let fresh = self
            .refreshed
            .clone()
            .ok_or_else(|| AuthError::Api("refresh token revoked".to_string()))?;
        *self.current.lock().unwrap() = fresh.clone();
        Ok(fresh)
    }
}

/// Capability that decodes bytes as UTF-8 and answers crypto checks as told.
pub struct FakeCapability {
    signature_ok: bool,
    proof_ok: bool,
}

impl FakeCapability {
    pub const fn accepting() -> Self {
        Self {
            signature_ok: true,
            proof_ok: true,
        }
    }

    pub const fn rejecting_signature() -> Self {
        Self {
            signature_ok: false,
            proof_ok: true,
        }
    }

    pub const fn rejecting_proof() -> Self {
        Self {
            signature_ok: true,
            proof_ok: false,
        }
    }
}

impl TokenCapability for FakeCapability {
    fn decode_qr(&self, raw: &[u8]) -> Result<String, VerificationError> {
        String::from_utf8(raw.to_vec())
            .map_err(|_| VerificationError::MalformedPayload("not UTF-8".to_string()))
    }

    fn verify_signature(&self, _scan: &ScanResult) -> bool {
        self.signature_ok
    }

    fn verify_merkle_proof(&self, _scan: &ScanResult, _proof: &[String]) -> bool {
        self.proof_ok
    }
}
