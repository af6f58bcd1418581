//! Event Hub - the service object
//!
//! Owns the log, the sequence authority and the session registry, and
//! exposes the three logical operations: `ingest`, `replay` and
//! `subscribe`. Everything is injected through `EventHub::open`; there is
//! no module-level state.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{HubConfig, SessionConfig};
use crate::error::{HubError, HubResult};
use crate::event_store::{EventLog, LogRotation, SequenceAuthority};
use crate::stream::{SessionInfo, SessionManager, StreamSession, Subscription};
use crate::topic::TopicFilter;
use crate::types::{Event, IngestRequest};

pub struct EventHub {
    log: Arc<EventLog>,
    sequence: SequenceAuthority,
    rotation: LogRotation,
    session_config: SessionConfig,
    sessions: Arc<SessionManager>,
    /// Held across id allocation and append so records land in id order
    ingest_lock: Mutex<()>,
    shutdown: CancellationToken,
}

impl EventHub {
    /// Open (or create) the store described by `config`
    pub fn open(config: &HubConfig) -> HubResult<Self> {
        let log = Arc::new(EventLog::open(config.store.clone())?);
        let sequence = SequenceAuthority::open(&log)?;

        tracing::info!(
            data_dir = %config.store.data_dir().display(),
            last_id = sequence.current(),
            "event hub opened"
        );

        Ok(Self {
            rotation: LogRotation::new(config.store.clone()),
            log,
            sequence,
            session_config: config.session.clone(),
            sessions: Arc::new(SessionManager::new()),
            ingest_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Validate and append a new event, returning its id
    ///
    /// This is the only path that appends to the log.
    pub fn ingest(&self, topic: &str, data: Value, retain: bool) -> HubResult<u64> {
        validate_topic(topic)?;

        let _guard = self.ingest_lock.lock();

        let id = self.sequence.next()?;
        let event = Event::new(id, topic, data, retain);

        if let Err(e) = self.log.append(&event) {
            tracing::error!(id, topic, error = %e, "append failed");
            self.sequence.release(id);
            return Err(e);
        }

        tracing::debug!(id, topic, retain, "event ingested");
        Ok(id)
    }

    pub fn ingest_request(&self, request: IngestRequest) -> HubResult<u64> {
        self.ingest(&request.topic, request.data, request.retain)
    }

    /// Stored events after `last_seen_id` matching `patterns`
    pub fn replay<S: AsRef<str>>(
        &self,
        patterns: &[S],
        last_seen_id: Option<u64>,
    ) -> HubResult<Vec<Event>> {
        self.log
            .read_from(last_seen_id.unwrap_or(0), &TopicFilter::new(patterns))
    }

    /// Start a session: replay from `last_seen_id`, then tail
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<S: AsRef<str>>(&self, patterns: &[S], last_seen_id: Option<u64>) -> Subscription {
        let session_id = self.sessions.generate_session_id();
        let last_seen_id = last_seen_id.unwrap_or(0);
        let (tx, rx) = mpsc::channel(self.session_config.channel_capacity);
        let cancel = self.shutdown.child_token();

        let session = StreamSession::new(
            session_id.clone(),
            self.log.clone(),
            TopicFilter::new(patterns),
            last_seen_id,
            self.session_config.clone(),
            tx,
            cancel.clone(),
        );

        self.sessions.register(SessionInfo {
            session_id: session_id.clone(),
            patterns: patterns.iter().map(|p| p.as_ref().to_string()).collect(),
            last_seen_id,
            connected_at: crate::utils::unix_now(),
        });

        let sessions = self.sessions.clone();
        let sid = session_id.clone();
        let task = tokio::spawn(async move {
            let reason = session.run().await;
            sessions.remove(&sid);
            reason
        });

        Subscription::new(session_id, rx, cancel, task)
    }

    /// Archive the active log and start a fresh one
    pub fn rotate_log(&self) -> HubResult<Option<PathBuf>> {
        let _guard = self.ingest_lock.lock();
        self.rotation.rotate(&self.log)
    }

    /// Last id handed out (0 if none)
    pub fn last_event_id(&self) -> u64 {
        self.sequence.current()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.session_count()
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn rotation(&self) -> &LogRotation {
        &self.rotation
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// Cancel every live session
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

fn validate_topic(topic: &str) -> HubResult<()> {
    if topic.trim().is_empty() {
        return Err(HubError::invalid_payload("require {topic, data?}"));
    }
    if topic.chars().any(char::is_control) {
        return Err(HubError::invalid_payload("topic must not contain control characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_hub() -> (EventHub, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let hub = EventHub::open(&HubConfig::with_data_dir(temp_dir.path())).unwrap();
        (hub, temp_dir)
    }

    #[test]
    fn test_ingest_assigns_increasing_ids() {
        let (hub, _temp_dir) = create_test_hub();

        assert_eq!(hub.ingest("demo.ping", json!({"n": 1}), false).unwrap(), 1);
        assert_eq!(hub.ingest("demo.pong", json!({"n": 2}), false).unwrap(), 2);
        assert_eq!(hub.last_event_id(), 2);
    }

    #[test]
    fn test_empty_topic_rejected_without_consuming_id() {
        let (hub, _temp_dir) = create_test_hub();

        for topic in ["", "   "] {
            let err = hub.ingest(topic, json!({"n": 1}), false).unwrap_err();
            assert!(matches!(err, HubError::InvalidPayload(_)));
        }
        assert_eq!(hub.last_event_id(), 0);
        assert_eq!(hub.ingest("a.b", Value::Null, false).unwrap(), 1);
    }

    #[test]
    fn test_control_characters_rejected() {
        let (hub, _temp_dir) = create_test_hub();
        let err = hub.ingest("a\nb", Value::Null, false).unwrap_err();
        assert!(matches!(err, HubError::InvalidPayload(_)));
        assert!(hub.replay::<&str>(&[], None).unwrap().is_empty());
    }

    #[test]
    fn test_replay_filters() {
        let (hub, _temp_dir) = create_test_hub();
        hub.ingest("demo.ping", json!({"n": 1}), false).unwrap();
        hub.ingest("demo.pong", json!({"n": 2}), true).unwrap();

        let events = hub.replay(&["demo.ping"], Some(0)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, json!({"n": 1}));

        let events = hub.replay(&["demo.*"], Some(1)).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].retain);
    }

    #[test]
    fn test_ids_continue_after_reopen_and_rotation() {
        let temp_dir = TempDir::new().unwrap();
        let config = HubConfig::with_data_dir(temp_dir.path());
        {
            let hub = EventHub::open(&config).unwrap();
            hub.ingest("a.b", Value::Null, false).unwrap();
            hub.ingest("a.b", Value::Null, false).unwrap();
            assert!(hub.rotate_log().unwrap().is_some());
        }

        // Counter file lost; archive still records id 2
        std::fs::remove_file(config.store.sequence_path()).unwrap();

        let hub = EventHub::open(&config).unwrap();
        assert_eq!(hub.ingest("a.b", Value::Null, false).unwrap(), 3);
    }
}
