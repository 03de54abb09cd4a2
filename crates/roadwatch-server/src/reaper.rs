//! Periodic removal of uploads that no socket ever claimed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::store::SessionStore;
use crate::upload::remove_upload;

/// Finish every unclaimed upload older than `ttl` and delete its file.
/// Returns how many were removed.
pub async fn reap_expired(store: &SessionStore, ttl: Duration) -> usize {
    let mut removed = 0;
    for id in store.expired_uploads(ttl) {
        // A socket may have claimed it since the scan.
        if let Some(path) = store.finish_unclaimed(&id) {
            remove_upload(&path).await;
            removed += 1;
        }
    }
    removed
}

/// Start the reaper. Runs until `shutdown` is cancelled.
pub fn start_reaper_task(
    store: Arc<SessionStore>,
    interval: Duration,
    ttl: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let _ = ticker.tick().await;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = reap_expired(&store, ttl).await;
                    if removed > 0 {
                        info!(removed, "expired uploads reaped");
                    }
                }
            }
        }
    })
}
