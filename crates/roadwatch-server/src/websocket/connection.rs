//! Outbound side of a WebSocket client connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use roadwatch_core::ConnectionId;
use tokio::sync::mpsc;

/// A frame queued for the socket writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Cloneable sender half of a client connection.
///
/// Sends wait for queue capacity instead of dropping, so a slow client
/// slows its own session down and never loses or reorders frames.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    sent: Arc<AtomicU64>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            tx,
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handle plus the receiver the writer task drains.
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(id, tx), rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue a text frame. Returns `false` if the writer is gone.
    pub async fn send_text(&self, text: String) -> bool {
        let ok = self.tx.send(Outbound::Text(text)).await.is_ok();
        if ok {
            let _ = self.sent.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// Queue a close frame. Returns `false` if the writer is gone.
    pub async fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.tx
            .send(Outbound::Close {
                code,
                reason: reason.into(),
            })
            .await
            .is_ok()
    }

    /// Text frames accepted into the queue so far.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}
