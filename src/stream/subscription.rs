//! Subscription handles and the live-session registry

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::session::{CloseReason, StreamItem};

/// Subscriber side of a running session
///
/// Yields replayed events, then live events and keepalives. Dropping the
/// handle cancels the session.
pub struct Subscription {
    id: String,
    items: ReceiverStream<StreamItem>,
    cancel: CancellationToken,
    task: Option<JoinHandle<CloseReason>>,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        rx: mpsc::Receiver<StreamItem>,
        cancel: CancellationToken,
        task: JoinHandle<CloseReason>,
    ) -> Self {
        Self {
            id,
            items: ReceiverStream::new(rx),
            cancel,
            task: Some(task),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next item, or `None` once the session has closed
    pub async fn recv(&mut self) -> Option<StreamItem> {
        self.items.next().await
    }

    /// Close the session and wait for it to finish
    pub async fn close(mut self) -> Option<CloseReason> {
        self.cancel.cancel();
        let task = self.task.take()?;
        task.await.ok()
    }

    /// Wait for the session to end on its own (deadline or store error)
    ///
    /// Items still queued are discarded.
    pub async fn finished(mut self) -> Option<CloseReason> {
        let task = self.task.take()?;
        // Keep draining so a blocked send cannot stall the session
        while self.items.next().await.is_some() {}
        task.await.ok()
    }
}

impl Stream for Subscription {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamItem>> {
        Pin::new(&mut self.items).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Registry entry for a live session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub patterns: Vec<String>,
    pub last_seen_id: u64,
    pub connected_at: i64,
}

/// Tracks live sessions
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionInfo>>,
    next_session: AtomicU64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_session: AtomicU64::new(0),
        }
    }

    /// Generate a new session ID
    pub fn generate_session_id(&self) -> String {
        let n = self.next_session.fetch_add(1, Ordering::Relaxed);
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        format!("sess_{:x}_{}", nanos, n)
    }

    pub fn register(&self, info: SessionInfo) {
        self.sessions.write().insert(info.session_id.clone(), info);
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.write().remove(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Get active session count
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        let manager = SessionManager::new();
        let a = manager.generate_session_id();
        let b = manager.generate_session_id();
        assert!(a.starts_with("sess_"));
        assert!(a.ends_with("_0"));
        assert!(b.ends_with("_1"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_registry_lifecycle() {
        let manager = SessionManager::new();
        let info = SessionInfo {
            session_id: "sess_1".to_string(),
            patterns: vec!["demo.*".to_string()],
            last_seen_id: 7,
            connected_at: 0,
        };

        manager.register(info);
        assert_eq!(manager.session_count(), 1);
        assert_eq!(manager.get("sess_1").unwrap().last_seen_id, 7);

        assert!(manager.remove("sess_1").is_some());
        assert_eq!(manager.session_count(), 0);
        assert!(manager.remove("sess_1").is_none());
    }

    #[tokio::test]
    async fn test_drop_cancels_session() {
        let (tx, rx) = mpsc::channel::<StreamItem>(1);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            token.cancelled().await;
            drop(tx);
            CloseReason::Disconnected
        });

        let subscription = Subscription::new("sess_x".to_string(), rx, cancel.clone(), task);
        drop(subscription);
        assert!(cancel.is_cancelled());
    }
}
