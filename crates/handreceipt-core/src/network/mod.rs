//! Connectivity tracking and sync triggers.
//!
//! Platform reachability callbacks feed [`NetworkMonitor::report`]. A change
//! only counts once it has held for the debounce window, so a burst of
//! on/off/on flaps produces a single offline to online transition and a
//! single drain.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::NetworkConfig;
use crate::sync::{SyncReport, SyncResult};
use crate::util::unix_millis_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub const fn from_online(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }
}

/// Something that can run a drain pass; implemented by the orchestrator.
pub trait SyncTarget: Send + Sync + 'static {
    fn drain(&self) -> impl Future<Output = SyncResult<SyncReport>> + Send;
}

/// Debounced connectivity, created before the monitor so the orchestrator
/// can subscribe to it.
pub struct ConnectivitySignal {
    tx: watch::Sender<Connectivity>,
}

impl ConnectivitySignal {
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

pub struct NetworkMonitor<S> {
    raw: watch::Sender<bool>,
    status: watch::Receiver<Connectivity>,
    foreground: Arc<Notify>,
    target: Arc<S>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: SyncTarget> NetworkMonitor<S> {
    /// Start watching connectivity on the current tokio runtime.
    pub fn spawn(signal: ConnectivitySignal, target: Arc<S>, config: &NetworkConfig) -> Self {
        let initial = *signal.tx.borrow() == Connectivity::Online;
        let (raw, raw_rx) = watch::channel(initial);
        let status = signal.subscribe();
        let foreground = Arc::new(Notify::new());

        let task = tokio::spawn(run(
            raw_rx,
            signal.tx,
            Arc::clone(&foreground),
            Arc::clone(&target),
            config.debounce(),
        ));

        Self {
            raw,
            status,
            foreground,
            target,
            task: Mutex::new(Some(task)),
        }
    }

    /// Feed a raw reachability reading from the platform.
    pub fn report(&self, online: bool) {
        self.raw.send_replace(online);
    }

    pub fn connectivity(&self) -> Connectivity {
        *self.status.borrow()
    }

    /// Debounced connectivity changes.
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.status.clone()
    }

    /// Drain now, attaching to a pass that is already running.
    ///
    /// Returns `false` without scheduling anything while offline, and
    /// otherwise whether the pass finished without failures or retries.
    pub async fn sync_now(&self) -> bool {
        if self.connectivity() == Connectivity::Offline {
            tracing::debug!("sync_now ignored while offline");
            return false;
        }
        match self.target.drain().await {
            Ok(report) => report.is_clean(),
            Err(error) => {
                tracing::warn!("Manual sync failed: {error}");
                false
            }
        }
    }

    /// The app came back to the foreground.
    pub fn on_foreground(&self) {
        self.foreground.notify_one();
    }

    /// Stop the background task. Manual `sync_now` keeps working.
    pub fn shutdown(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            tracing::debug!("Network monitor stopped");
        }
    }
}

impl<S> Drop for NetworkMonitor<S> {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

async fn run<S: SyncTarget>(
    mut raw: watch::Receiver<bool>,
    status: watch::Sender<Connectivity>,
    foreground: Arc<Notify>,
    target: Arc<S>,
    debounce: Duration,
) {
    let mut follow_up: Option<Instant> = None;

    loop {
        let current = *status.borrow();
        tokio::select! {
            changed = raw.changed() => {
                if changed.is_err() {
                    return;
                }
                let Some(online) = settle(&mut raw, debounce).await else {
                    return;
                };
                follow_up = None;

                let next = Connectivity::from_online(online);
                if next == current {
                    continue;
                }
                status.send_replace(next);
                tracing::info!("Connectivity changed to {next:?}");
                if next == Connectivity::Online {
                    follow_up = drain(target.as_ref()).await;
                }
            }
            () = foreground.notified() => {
                if current == Connectivity::Online {
                    tracing::debug!("Foreground sync requested");
                    follow_up = drain(target.as_ref()).await;
                }
            }
            () = sleep_until(follow_up), if follow_up.is_some() => {
                follow_up = None;
                if current == Connectivity::Online {
                    tracing::debug!("Running scheduled retry pass");
                    follow_up = drain(target.as_ref()).await;
                }
            }
        }
    }
}

/// Wait until the raw reading holds for `debounce`; `None` when the
/// reporting side is gone.
async fn settle(raw: &mut watch::Receiver<bool>, debounce: Duration) -> Option<bool> {
    loop {
        match tokio::time::timeout(debounce, raw.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return None,
            Err(_) => return Some(*raw.borrow_and_update()),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
    }
}

/// Run one pass and return when the next scheduled retry is due.
async fn drain<S: SyncTarget>(target: &S) -> Option<Instant> {
    match target.drain().await {
        Ok(report) => report.next_retry_at.map(|at| {
            let wait = u64::try_from(at.saturating_sub(unix_millis_now())).unwrap_or(0);
            Instant::now() + Duration::from_millis(wait)
        }),
        Err(error) => {
            tracing::warn!("Automatic sync failed: {error}");
            None
        }
    }
}
