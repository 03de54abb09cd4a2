//! Session registry: one entry per uploaded file, keyed by session id.
//!
//! An entry is created by the upload handler, claimed by exactly one
//! WebSocket, and removed exactly once by [`SessionStore::finish`] (or the
//! reaper / shutdown sweep). Every operation is atomic per key; distinct
//! sessions never contend on the same shard lock for long.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use roadwatch_core::SessionId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ClaimError;
use crate::websocket::connection::ConnectionHandle;

/// The running coordinator task for a session.
#[derive(Debug)]
pub struct SessionTask {
    pub cancel: CancellationToken,
    pub handle: JoinHandle<()>,
}

#[derive(Debug)]
struct SessionEntry {
    path: PathBuf,
    uploaded_at: Instant,
    claimed: bool,
    connection: Option<ConnectionHandle>,
    task: Option<SessionTask>,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    entries: DashMap<SessionId, SessionEntry>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly uploaded file.
    pub fn record_upload(&self, id: SessionId, path: PathBuf) {
        let _ = self.entries.insert(
            id,
            SessionEntry {
                path,
                uploaded_at: Instant::now(),
                claimed: false,
                connection: None,
                task: None,
            },
        );
    }

    /// Bind a start request to its upload. The path must be the one the
    /// upload handler returned, and a session can be claimed only once.
    pub fn claim(&self, id: &SessionId, path: &Path) -> Result<(), ClaimError> {
        let mut entry = self.entries.get_mut(id).ok_or(ClaimError::UnknownSession)?;
        if entry.path != path {
            return Err(ClaimError::PathMismatch);
        }
        if entry.claimed {
            return Err(ClaimError::AlreadyClaimed);
        }
        entry.claimed = true;
        Ok(())
    }

    /// Attach the live connection. Returns `false` if the session is gone.
    pub fn register(&self, id: &SessionId, connection: ConnectionHandle) -> bool {
        match self.entries.get_mut(id) {
            Some(mut entry) => {
                entry.connection = Some(connection);
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, id: &SessionId) -> Option<ConnectionHandle> {
        self.entries.get(id).and_then(|e| e.connection.clone())
    }

    /// Drop the connection, keeping the entry for the coordinator to finish.
    pub fn unregister(&self, id: &SessionId) -> Option<ConnectionHandle> {
        self.entries.get_mut(id).and_then(|mut e| e.connection.take())
    }

    pub fn is_connected(&self, id: &SessionId) -> bool {
        self.entries
            .get(id)
            .is_some_and(|e| e.connection.is_some())
    }

    /// Record the coordinator task. If the session already finished, the
    /// task is handed back.
    pub fn attach_task(&self, id: &SessionId, task: SessionTask) -> Result<(), SessionTask> {
        match self.entries.get_mut(id) {
            Some(mut entry) => {
                entry.task = Some(task);
                Ok(())
            }
            None => Err(task),
        }
    }

    /// Remove the entry. Only the first caller for an id gets the path, so
    /// the temp file is deleted exactly once.
    pub fn finish(&self, id: &SessionId) -> Option<PathBuf> {
        self.entries.remove(id).map(|(_, entry)| entry.path)
    }

    /// Like [`finish`](Self::finish), but only while nobody has claimed it.
    pub fn finish_unclaimed(&self, id: &SessionId) -> Option<PathBuf> {
        self.entries
            .remove_if(id, |_, entry| !entry.claimed)
            .map(|(_, entry)| entry.path)
    }

    /// Take every attached coordinator task, leaving entries in place.
    pub fn take_tasks(&self) -> Vec<(SessionId, SessionTask)> {
        let mut tasks = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if let Some(task) = entry.task.take() {
                tasks.push((entry.key().clone(), task));
            }
        }
        tasks
    }

    /// Remove every entry, returning the paths they owned.
    pub fn drain(&self) -> Vec<(SessionId, PathBuf)> {
        let ids: Vec<SessionId> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.into_iter()
            .filter_map(|id| self.finish(&id).map(|path| (id, path)))
            .collect()
    }

    /// Unclaimed uploads older than `ttl`.
    pub fn expired_uploads(&self, ttl: Duration) -> Vec<SessionId> {
        self.entries
            .iter()
            .filter(|e| !e.claimed && e.uploaded_at.elapsed() >= ttl)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roadwatch_core::ConnectionId;
    use std::sync::Arc;

    fn upload(store: &SessionStore) -> (SessionId, PathBuf) {
        let id = SessionId::new();
        let path = PathBuf::from(format!("/tmp/roadwatch-test/{id}.mp4"));
        store.record_upload(id.clone(), path.clone());
        (id, path)
    }

    fn connection() -> ConnectionHandle {
        ConnectionHandle::channel(ConnectionId::new(), 4).0
    }

    #[test]
    fn claim_requires_matching_path() {
        let store = SessionStore::new();
        let (id, path) = upload(&store);
        assert_eq!(
            store.claim(&id, Path::new("/etc/passwd")),
            Err(ClaimError::PathMismatch)
        );
        assert_eq!(store.claim(&id, &path), Ok(()));
    }

    #[test]
    fn claim_only_once() {
        let store = SessionStore::new();
        let (id, path) = upload(&store);
        store.claim(&id, &path).unwrap();
        assert_eq!(store.claim(&id, &path), Err(ClaimError::AlreadyClaimed));
    }

    #[test]
    fn claim_unknown_session() {
        let store = SessionStore::new();
        assert_eq!(
            store.claim(&SessionId::from_raw("x"), Path::new("/tmp/x.mp4")),
            Err(ClaimError::UnknownSession)
        );
    }

    #[test]
    fn register_lookup_unregister() {
        let store = SessionStore::new();
        let (id, _) = upload(&store);
        assert!(!store.is_connected(&id));
        assert!(store.register(&id, connection()));
        assert!(store.is_connected(&id));
        assert!(store.lookup(&id).is_some());

        assert!(store.unregister(&id).is_some());
        assert!(!store.is_connected(&id));
        assert!(store.lookup(&id).is_none());
        // Entry survives until finished.
        assert!(store.contains(&id));
    }

    #[test]
    fn register_missing_session_fails() {
        let store = SessionStore::new();
        assert!(!store.register(&SessionId::new(), connection()));
    }

    #[test]
    fn finish_is_exactly_once() {
        let store = SessionStore::new();
        let (id, path) = upload(&store);
        assert_eq!(store.finish(&id), Some(path));
        assert_eq!(store.finish(&id), None);
        assert!(!store.contains(&id));
    }

    #[test]
    fn concurrent_finish_yields_one_winner() {
        let store = Arc::new(SessionStore::new());
        let (id, _) = upload(&store);
        let winners: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = store.clone();
                    let id = id.clone();
                    s.spawn(move || usize::from(store.finish(&id).is_some()))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(winners, 1);
    }

    #[test]
    fn finish_unclaimed_skips_claimed() {
        let store = SessionStore::new();
        let (claimed, path) = upload(&store);
        let (idle, idle_path) = upload(&store);
        store.claim(&claimed, &path).unwrap();

        assert_eq!(store.finish_unclaimed(&claimed), None);
        assert_eq!(store.finish_unclaimed(&idle), Some(idle_path));
        assert!(store.contains(&claimed));
    }

    #[test]
    fn expired_uploads_ignore_claimed_sessions() {
        let store = SessionStore::new();
        let (claimed, path) = upload(&store);
        let (idle, _) = upload(&store);
        store.claim(&claimed, &path).unwrap();

        assert_eq!(store.expired_uploads(Duration::ZERO), vec![idle]);
        assert!(store.expired_uploads(Duration::from_secs(3600)).is_empty());
    }

    #[test]
    fn drain_empties_store() {
        let store = SessionStore::new();
        for _ in 0..5 {
            let _ = upload(&store);
        }
        let drained = store.drain();
        assert_eq!(drained.len(), 5);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn attach_and_take_tasks() {
        let store = SessionStore::new();
        let (id, _) = upload(&store);
        let task = SessionTask {
            cancel: CancellationToken::new(),
            handle: tokio::spawn(async {}),
        };
        assert!(store.attach_task(&id, task).is_ok());

        let tasks = store.take_tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].0, id);
        assert!(store.take_tasks().is_empty());
        assert!(store.contains(&id));
    }

    #[tokio::test]
    async fn attach_to_finished_session_returns_task() {
        let store = SessionStore::new();
        let task = SessionTask {
            cancel: CancellationToken::new(),
            handle: tokio::spawn(async {}),
        };
        assert!(store.attach_task(&SessionId::new(), task).is_err());
    }
}
