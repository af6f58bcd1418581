//! Event Store Module
//!
//! Durable side of the hub:
//! - `EventLog`: append-only NDJSON log with cursor-based reads
//! - `SequenceAuthority`: durable, monotonically increasing event ids
//! - `LogRotation`: archives the active log and swaps in an empty one
//!
//! # Architecture
//!
//! ```text
//! Write Path (single writer):
//! ┌─────────┐    ┌──────────────────┐    ┌──────────────────────┐
//! │ ingest  │───►│ SequenceAuthority│───►│ append to            │
//! │         │    │ next() -> seq.txt│    │ events.ndjson (fsync)│
//! └─────────┘    └──────────────────┘    └──────────────────────┘
//!
//! Read Path (per session):
//! ┌────────────────┐    ┌──────────────────┐    ┌──────────────────┐
//! │ replay_from(id)│───►│ poll size_marker │───►│ read_since(cursor)│
//! │ -> cursor      │    │ (shrink = rotate)│    │ -> new cursor    │
//! └────────────────┘    └──────────────────┘    └──────────────────┘
//! ```

mod rotation;
mod sequence;
mod store;

pub use rotation::{ArchiveInfo, LogRotation};
pub use sequence::SequenceAuthority;
pub use store::{EventLog, LogCursor, StoreConfig};
