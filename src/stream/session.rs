//! Stream Session - per-subscriber replay + live tail
//!
//! ```text
//! REPLAYING ──► TAILING ◄──► KEEPALIVE
//!                  │
//!                  ▼
//!               CLOSED   (disconnect, deadline, store error)
//! ```
//!
//! A session runs as its own task and talks to the transport through a
//! bounded channel. It suspends only while sleeping between polls and
//! while waiting for the channel to accept an item; both waits race the
//! cancellation token and the session deadline.
//!
//! Rotations done through this process bump the log's epoch; the session
//! then drains what it had not read from the archive before restarting at
//! the head of the new file. A log that merely shrinks (rotated by someone
//! else) restarts the cursor at 0.

use std::convert::Infallible;
use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::error::{HubError, HubResult};
use crate::event_store::{EventLog, LogCursor};
use crate::topic::TopicFilter;
use crate::types::Event;

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Replaying,
    Tailing,
    Keepalive,
    Closed,
}

/// Item delivered to the transport
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(Event),
    /// No-op signal to keep the transport alive
    Keepalive,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Subscriber went away or the hub shut down
    Disconnected,
    /// Hard session lifetime elapsed; the client should resume by id
    DeadlineElapsed,
    /// Reading the log failed
    StoreError(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Disconnected => write!(f, "disconnected"),
            CloseReason::DeadlineElapsed => write!(f, "deadline elapsed"),
            CloseReason::StoreError(msg) => write!(f, "store error: {}", msg),
        }
    }
}

/// State machine for one subscriber
pub struct StreamSession {
    id: String,
    log: Arc<EventLog>,
    filter: TopicFilter,
    last_seen_id: u64,
    config: SessionConfig,
    tx: mpsc::Sender<StreamItem>,
    cancel: CancellationToken,
    state: SessionState,
    cursor: LogCursor,
    /// Rotation epoch `cursor` belongs to
    epoch: u64,
    /// Highest id handed to the subscriber so far
    last_emitted: u64,
}

impl StreamSession {
    pub fn new(
        id: String,
        log: Arc<EventLog>,
        filter: TopicFilter,
        last_seen_id: u64,
        config: SessionConfig,
        tx: mpsc::Sender<StreamItem>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            log,
            filter,
            last_seen_id,
            config,
            tx,
            cancel,
            state: SessionState::Replaying,
            cursor: LogCursor::START,
            epoch: 0,
            last_emitted: last_seen_id,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until it closes
    ///
    /// Dropping the returned future (or the session) releases the channel,
    /// which ends the subscriber's stream.
    pub async fn run(mut self) -> CloseReason {
        let deadline = Instant::now() + self.config.session_deadline;
        tracing::info!(session = %self.id, last_seen_id = self.last_seen_id, "session opened");

        let reason = match self.drive(deadline).await {
            Ok(never) => match never {},
            Err(reason) => reason,
        };

        self.state = SessionState::Closed;
        match &reason {
            CloseReason::StoreError(msg) => {
                tracing::error!(session = %self.id, error = %msg, "session closed on store error")
            }
            other => tracing::info!(session = %self.id, reason = %other, "session closed"),
        }
        reason
    }

    async fn drive(&mut self, deadline: Instant) -> Result<Infallible, CloseReason> {
        // REPLAYING
        self.state = SessionState::Replaying;
        let last_seen = self.last_seen_id;
        let (history, cursor, epoch) = loop {
            let epoch = self.log.epoch();
            let filter = self.filter.clone();
            let (history, cursor) = self
                .blocking(move |log| log.replay_from(last_seen, &filter))
                .await?;
            // The cursor is only usable if no rotation raced the read
            if self.log.epoch() == epoch {
                break (history, cursor, epoch);
            }
        };

        tracing::debug!(session = %self.id, replayed = history.len(), "replay complete");
        for event in history {
            self.emit_event(event, deadline).await?;
        }

        // Tail from exactly where replay stopped
        self.cursor = cursor;
        self.epoch = epoch;
        self.state = SessionState::Tailing;
        let mut idle_since = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(CloseReason::Disconnected),
                _ = tokio::time::sleep_until(deadline) => return Err(CloseReason::DeadlineElapsed),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            if self.log.epoch() != self.epoch && self.catch_up_rotation(deadline).await? {
                idle_since = Instant::now();
            }

            let marker = self.blocking(|log| log.size_marker()).await?;

            if marker < self.cursor {
                tracing::warn!(
                    session = %self.id,
                    cursor = self.cursor.offset(),
                    size = marker.offset(),
                    "log shrank, assuming rotation"
                );
                self.cursor = LogCursor::START;
            }

            if marker > self.cursor {
                let from = self.cursor;
                let (events, next) = self.blocking(move |log| log.read_since(from)).await?;

                // Rotated mid-read: the bytes may belong to the new file
                if self.log.epoch() != self.epoch {
                    continue;
                }
                self.cursor = next;

                if self.emit_new(events, deadline).await? {
                    idle_since = Instant::now();
                    continue;
                }
            }

            if idle_since.elapsed() >= self.config.keepalive_interval {
                self.state = SessionState::Keepalive;
                tracing::debug!(session = %self.id, "keepalive");
                self.emit(StreamItem::Keepalive, deadline).await?;
                self.state = SessionState::Tailing;
                idle_since = Instant::now();
            }
        }
    }

    /// Deliver the records the last rotation(s) archived before this
    /// session read them, then restart at the head of the new file
    async fn catch_up_rotation(&mut self, deadline: Instant) -> Result<bool, CloseReason> {
        let (from, cursor) = (self.epoch, self.cursor);
        let (missed, reached) = self
            .blocking(move |log| log.read_rotated(from, cursor))
            .await?;

        tracing::info!(
            session = %self.id,
            from_epoch = from,
            epoch = reached,
            archived = missed.len(),
            "log rotated, catching up from archive"
        );

        self.epoch = reached;
        self.cursor = LogCursor::START;
        self.emit_new(missed, deadline).await
    }

    /// Emit records not yet delivered that pass the filter; returns
    /// whether anything was sent
    async fn emit_new(&mut self, events: Vec<Event>, deadline: Instant) -> Result<bool, CloseReason> {
        let mut emitted = false;
        for event in events {
            if event.id <= self.last_emitted || !self.filter.matches(&event.topic) {
                continue;
            }
            self.emit_event(event, deadline).await?;
            emitted = true;
        }
        Ok(emitted)
    }

    async fn emit_event(&mut self, event: Event, deadline: Instant) -> Result<(), CloseReason> {
        let id = event.id;
        self.emit(StreamItem::Event(event), deadline).await?;
        self.last_emitted = id;
        Ok(())
    }

    /// Hand one item to the transport, waiting for channel capacity
    async fn emit(&self, item: StreamItem, deadline: Instant) -> Result<(), CloseReason> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CloseReason::Disconnected),
            _ = tokio::time::sleep_until(deadline) => Err(CloseReason::DeadlineElapsed),
            sent = self.tx.send(item) => sent.map_err(|_| CloseReason::Disconnected),
        }
    }

    /// Run a log read on the blocking pool
    async fn blocking<T, F>(&self, f: F) -> Result<T, CloseReason>
    where
        F: FnOnce(&EventLog) -> HubResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let log = self.log.clone();
        let result = tokio::task::spawn_blocking(move || f(&log))
            .await
            .map_err(|e| HubError::StoreUnavailable(io::Error::new(io::ErrorKind::Other, e.to_string())))
            .and_then(|r| r);

        result.map_err(|e| CloseReason::StoreError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::StoreConfig;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            poll_interval: Duration::from_millis(10),
            keepalive_interval: Duration::from_millis(60),
            session_deadline: Duration::from_secs(5),
            channel_capacity: 16,
        }
    }

    fn setup(config: SessionConfig, patterns: &[&str], last_seen_id: u64) -> (
        Arc<EventLog>,
        StreamSession,
        mpsc::Receiver<StreamItem>,
        CancellationToken,
        TempDir,
    ) {
        let temp_dir = TempDir::new().unwrap();
        let log = Arc::new(EventLog::open(StoreConfig::new(temp_dir.path())).unwrap());
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let cancel = CancellationToken::new();
        let session = StreamSession::new(
            "sess_test".to_string(),
            log.clone(),
            TopicFilter::new(patterns),
            last_seen_id,
            config,
            tx,
            cancel.clone(),
        );
        (log, session, rx, cancel, temp_dir)
    }

    async fn next_event(rx: &mut mpsc::Receiver<StreamItem>) -> Event {
        loop {
            let item = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("session closed");
            if let StreamItem::Event(event) = item {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_new_session_starts_replaying() {
        let (_log, session, _rx, _cancel, _temp_dir) = setup(fast_config(), &[], 0);
        assert_eq!(session.state(), SessionState::Replaying);
        assert_eq!(session.id(), "sess_test");
    }

    #[tokio::test]
    async fn test_replay_then_tail() {
        let (log, session, mut rx, cancel, _temp_dir) = setup(fast_config(), &[], 1);
        for id in 1..=3 {
            log.append(&Event::new(id, "a.b", json!(id), false)).unwrap();
        }

        let handle = tokio::spawn(session.run());

        assert_eq!(next_event(&mut rx).await.id, 2);
        assert_eq!(next_event(&mut rx).await.id, 3);

        log.append(&Event::new(4, "a.c", json!(4), false)).unwrap();
        assert_eq!(next_event(&mut rx).await.id, 4);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), CloseReason::Disconnected);
    }

    #[tokio::test]
    async fn test_tail_filters_topics() {
        let (log, session, mut rx, cancel, _temp_dir) = setup(fast_config(), &["keep.*"], 0);
        let handle = tokio::spawn(session.run());

        log.append(&Event::new(1, "drop.me", json!(null), false)).unwrap();
        log.append(&Event::new(2, "keep.me", json!(null), false)).unwrap();

        let event = next_event(&mut rx).await;
        assert_eq!(event.id, 2);
        assert_eq!(event.topic, "keep.me");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_keepalive_when_idle() {
        let (_log, session, mut rx, cancel, _temp_dir) = setup(fast_config(), &[], 0);
        let handle = tokio::spawn(session.run());

        let item = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item, StreamItem::Keepalive);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_deadline_closes_session() {
        let config = SessionConfig {
            session_deadline: Duration::from_millis(80),
            keepalive_interval: Duration::from_secs(60),
            ..fast_config()
        };
        let (_log, session, mut rx, _cancel, _temp_dir) = setup(config, &[], 0);

        let reason = tokio::time::timeout(Duration::from_secs(2), session.run())
            .await
            .unwrap();
        assert_eq!(reason, CloseReason::DeadlineElapsed);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_disconnects() {
        let (log, session, rx, _cancel, _temp_dir) = setup(fast_config(), &[], 0);
        log.append(&Event::new(1, "a.b", json!(null), false)).unwrap();
        drop(rx);

        let reason = tokio::time::timeout(Duration::from_secs(2), session.run())
            .await
            .unwrap();
        assert_eq!(reason, CloseReason::Disconnected);
    }

    #[tokio::test]
    async fn test_malformed_line_while_tailing_is_skipped() {
        let (log, session, mut rx, cancel, _temp_dir) = setup(fast_config(), &[], 0);
        let handle = tokio::spawn(session.run());

        log.append(&Event::new(1, "a.b", json!(1), false)).unwrap();
        assert_eq!(next_event(&mut rx).await.id, 1);

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .unwrap();
        std::io::Write::write_all(&mut file, b"{\"id\":oops\n").unwrap();
        log.append(&Event::new(2, "a.c", json!(2), false)).unwrap();

        assert_eq!(next_event(&mut rx).await.id, 2);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), CloseReason::Disconnected);
    }
}
