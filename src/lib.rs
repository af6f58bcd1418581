//! Event Hub
//!
//! A durable, replayable event stream. Producers append topic-tagged
//! events to an NDJSON log; subscribers replay everything after a resume
//! id and then keep receiving new events that match their topic patterns.
//!
//! # Features
//!
//! - **Durable ids**: gap-free, strictly increasing, recovered from the log
//! - **Resume by id**: replay after the last id a client saw, then tail
//! - **Topic patterns**: `*` matches exactly one dot-delimited segment
//! - **Rotation-safe tailing**: a shrinking log resets the session cursor
//! - **SSE front**: axum handlers for ingest, replay and streaming
//!
//! # Modules
//!
//! - `types`: the `Event` record and ingest request
//! - `event_store`: append-only log, sequence authority, rotation
//! - `topic`: pattern matching
//! - `stream`: per-subscriber session task and subscription handle
//! - `hub`: the `EventHub` service tying it together
//! - `api`: HTTP/SSE adapter
//! - `config`, `error`, `utils`
//!
//! # Example
//!
//! ```no_run
//! use event_hub::{EventHub, HubConfig, StreamItem};
//! use serde_json::json;
//!
//! # async fn demo() -> event_hub::HubResult<()> {
//! let hub = EventHub::open(&HubConfig::with_data_dir(".rt"))?;
//! let id = hub.ingest("demo.ping", json!({"n": 1}), false)?;
//!
//! let mut sub = hub.subscribe(&["demo.*"], Some(id - 1));
//! if let Some(StreamItem::Event(event)) = sub.recv().await {
//!     assert_eq!(event.id, id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod event_store;
pub mod hub;
pub mod stream;
pub mod topic;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use config::{HubConfig, SessionConfig};
pub use error::{HubError, HubResult};
pub use event_store::{EventLog, LogCursor, LogRotation, SequenceAuthority, StoreConfig};
pub use hub::EventHub;
pub use stream::{CloseReason, SessionState, StreamItem, StreamSession, Subscription};
pub use topic::{matches, TopicFilter};
pub use types::{Event, IngestRequest};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
