//! Event record for the append-only log
//!
//! One `Event` is one NDJSON line. Every record carries its own `id`, so
//! the log can be rebuilt (and the sequence recovered) by scanning it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HubError, HubResult};

/// An immutable, sequence-numbered event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Strictly increasing id, starting at 1
    pub id: u64,

    /// Unix timestamp (seconds) assigned at append time
    #[serde(rename = "ts")]
    pub timestamp: i64,

    /// Dot-segmented topic, e.g. `demo.ping`
    pub topic: String,

    /// Arbitrary payload, null when absent
    #[serde(default)]
    pub data: Value,

    /// Advisory flag surfaced to subscribers
    #[serde(default, skip_serializing_if = "is_false")]
    pub retain: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Event {
    /// Create a new event stamped with the current time
    pub fn new(id: u64, topic: impl Into<String>, data: Value, retain: bool) -> Self {
        Self {
            id,
            timestamp: crate::utils::unix_now(),
            topic: topic.into(),
            data,
            retain,
        }
    }

    /// Serialize to a single JSON line (no trailing newline)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON line
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Parse one stored line, rejecting records with an empty topic
    pub(crate) fn parse_record(line: &str, offset: u64) -> HubResult<Self> {
        let event = Self::from_json_line(line).map_err(|e| HubError::MalformedRecord {
            offset,
            reason: e.to_string(),
        })?;

        if event.topic.is_empty() {
            return Err(HubError::MalformedRecord {
                offset,
                reason: "empty topic".to_string(),
            });
        }

        Ok(event)
    }

    /// Subscriber-facing payload: `{topic, data, retain?}`
    pub fn payload(&self) -> Value {
        let mut payload = serde_json::json!({
            "topic": self.topic,
            "data": self.data,
        });
        if self.retain {
            payload["retain"] = Value::Bool(true);
        }
        payload
    }
}

/// Body accepted by the ingest operation
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub retain: bool,
}

impl IngestRequest {
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            data,
            retain: false,
        }
    }

    /// Parse an arbitrary JSON body, mapping shape errors to `InvalidPayload`
    pub fn from_value(value: Value) -> HubResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| HubError::invalid_payload(format!("require {{topic, data?}} ({})", e)))
    }
}
