//! Per-session processing loop.
//!
//! ```text
//! CONNECTING -> STREAMING -> EXHAUSTED | DISCONNECTED | CANCELLED | FAILED -> CLEANED_UP
//! ```
//!
//! Decoding, detection and encoding are blocking, so each step runs on the
//! blocking pool; the async task only sequences steps, sends results and
//! sleeps between frames.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::close_code;
use roadwatch_core::{FrameMessage, FrameSource, SessionId, VideoOpener, VisionError};
use roadwatch_vision::{FramePipeline, ProcessedFrame};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::{SessionStore, SessionTask};
use crate::upload::remove_upload;

/// Upper bound on waiting for queue space to deliver the final close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// How a session's loop ended.
#[derive(Debug)]
pub enum SessionOutcome {
    Exhausted,
    Disconnected,
    Cancelled,
    Failed(VisionError),
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exhausted => "exhausted",
            Self::Disconnected => "disconnected",
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "failed",
        }
    }

    /// Close frame to send, if the client is still there.
    pub fn close_frame(&self) -> Option<(u16, String)> {
        match self {
            Self::Exhausted => Some((close_code::NORMAL, "end of video".into())),
            Self::Cancelled => Some((close_code::AWAY, "server shutting down".into())),
            Self::Failed(e) => Some((close_code::ERROR, format!("{} error", e.error_kind()))),
            Self::Disconnected => None,
        }
    }
}

/// Summary logged when a session ends.
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub frames_sent: u64,
    pub outcome: SessionOutcome,
    pub elapsed: Duration,
}

/// Starts and drives session loops. One instance is shared by all sockets.
pub struct SessionCoordinator {
    store: Arc<SessionStore>,
    opener: Arc<dyn VideoOpener>,
    pipeline: Arc<FramePipeline>,
    pacing: Duration,
    shutdown: CancellationToken,
}

impl SessionCoordinator {
    pub fn new(
        store: Arc<SessionStore>,
        opener: Arc<dyn VideoOpener>,
        pipeline: Arc<FramePipeline>,
        pacing: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            opener,
            pipeline,
            pacing,
            shutdown,
        }
    }

    /// Spawn the loop for a claimed session and record it in the store,
    /// where the shutdown sweep can cancel and join it.
    pub fn start(self: &Arc<Self>, session_id: SessionId, path: PathBuf) {
        let cancel = self.shutdown.child_token();
        let this = Arc::clone(self);
        let task_cancel = cancel.clone();
        let task_id = session_id.clone();
        let handle = tokio::spawn(async move {
            let _ = this.run(task_id, path, task_cancel).await;
        });

        let task = SessionTask { cancel, handle };
        if self.store.attach_task(&session_id, task).is_err() {
            debug!(%session_id, "session finished before its task was recorded");
        }
    }

    /// Drive one session to a terminal state and clean it up.
    pub async fn run(
        &self,
        session_id: SessionId,
        path: PathBuf,
        cancel: CancellationToken,
    ) -> SessionReport {
        let started = Instant::now();
        info!(%session_id, path = %path.display(), "session streaming");

        let mut frames_sent = 0u64;
        let outcome = self
            .stream(&session_id, &path, &cancel, &mut frames_sent)
            .await;
        self.clean_up(&session_id, &outcome).await;

        let report = SessionReport {
            session_id,
            frames_sent,
            outcome,
            elapsed: started.elapsed(),
        };
        match &report.outcome {
            SessionOutcome::Failed(e) => warn!(
                session_id = %report.session_id,
                frames_sent = report.frames_sent,
                outcome = report.outcome.as_str(),
                error_kind = e.error_kind(),
                error = %e,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "session ended"
            ),
            _ => info!(
                session_id = %report.session_id,
                frames_sent = report.frames_sent,
                outcome = report.outcome.as_str(),
                elapsed_ms = report.elapsed.as_millis() as u64,
                "session ended"
            ),
        }
        report
    }

    async fn stream(
        &self,
        session_id: &SessionId,
        path: &Path,
        cancel: &CancellationToken,
        frames_sent: &mut u64,
    ) -> SessionOutcome {
        let opener = Arc::clone(&self.opener);
        let open_path = path.to_path_buf();
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return SessionOutcome::Cancelled,
            r = tokio::task::spawn_blocking(move || opener.open(&open_path)) => r,
        };
        let mut source = match opened {
            Ok(Ok(source)) => source,
            Ok(Err(e)) => return SessionOutcome::Failed(e),
            Err(e) => return SessionOutcome::Failed(VisionError::Decode(format!("decoder task: {e}"))),
        };

        loop {
            if !self.store.is_connected(session_id) {
                return SessionOutcome::Disconnected;
            }

            let pipeline = Arc::clone(&self.pipeline);
            let step = tokio::task::spawn_blocking(move || {
                let result = next_processed(source.as_mut(), &pipeline);
                (source, result)
            });
            let joined = tokio::select! {
                biased;
                () = cancel.cancelled() => return SessionOutcome::Cancelled,
                r = step => r,
            };
            let (returned, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    return SessionOutcome::Failed(VisionError::Inference(format!(
                        "frame task: {e}"
                    )))
                }
            };
            source = returned;

            let processed = match result {
                Ok(Some(processed)) => processed,
                Ok(None) => return SessionOutcome::Exhausted,
                Err(e) => return SessionOutcome::Failed(e),
            };

            let message =
                FrameMessage::new(session_id.clone(), processed.counts, processed.frame_b64);
            let json = match message.to_json() {
                Ok(json) => json,
                Err(e) => return SessionOutcome::Failed(VisionError::Encode(e.to_string())),
            };

            if let Some(connection) = self.store.lookup(session_id) {
                let sent = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return SessionOutcome::Cancelled,
                    sent = connection.send_text(json) => sent,
                };
                if !sent {
                    return SessionOutcome::Disconnected;
                }
                *frames_sent += 1;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return SessionOutcome::Cancelled,
                () = tokio::time::sleep(self.pacing) => {}
            }
        }
    }

    async fn clean_up(&self, session_id: &SessionId, outcome: &SessionOutcome) {
        let connection = self.store.lookup(session_id);
        if let Some(path) = self.store.finish(session_id) {
            remove_upload(&path).await;
        }

        let (Some(connection), Some((code, reason))) = (connection, outcome.close_frame()) else {
            return;
        };
        if tokio::time::timeout(CLOSE_GRACE, connection.close(code, reason))
            .await
            .is_err()
        {
            debug!(%session_id, "close frame not delivered, queue full");
        }
    }
}

fn next_processed(
    source: &mut dyn FrameSource,
    pipeline: &FramePipeline,
) -> Result<Option<ProcessedFrame>, VisionError> {
    match source.next_frame()? {
        Some(frame) => pipeline.process(&frame).map(Some),
        None => Ok(None),
    }
}
