//! Graceful shutdown: cancellation fan-out plus the session sweep.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::SessionStore;
use crate::upload::remove_upload;

/// Default timeout for graceful shutdown before giving up on stragglers.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates graceful shutdown across all server tasks. Session tokens
/// are children of this token, so cancelling it reaches every session.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Cancel, then wait up to `timeout` for `handles` to finish.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();
        info!(
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );
        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// What a sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub tasks_cancelled: usize,
    pub files_removed: usize,
    pub timed_out: bool,
}

/// Cancel every session task, wait for them to settle, then finish every
/// entry still in the store and delete its file. Task failures and
/// per-file errors are logged and skipped, so the sweep always completes
/// with an empty store.
pub async fn shutdown_sweep(store: &SessionStore, timeout: Duration) -> SweepReport {
    let tasks = store.take_tasks();
    let mut report = SweepReport {
        tasks_cancelled: tasks.len(),
        ..SweepReport::default()
    };

    let mut handles = Vec::with_capacity(tasks.len());
    for (_, task) in tasks {
        task.cancel.cancel();
        handles.push(task.handle);
    }

    match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    debug!(error = %e, "session task ended abnormally");
                }
            }
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "session tasks did not settle in time");
            report.timed_out = true;
        }
    }

    for (session_id, path) in store.drain() {
        debug!(%session_id, path = %path.display(), "sweeping session");
        remove_upload(&path).await;
        report.files_removed += 1;
    }

    info!(
        tasks = report.tasks_cancelled,
        files = report.files_removed,
        timed_out = report.timed_out,
        "shutdown sweep complete"
    );
    report
}
