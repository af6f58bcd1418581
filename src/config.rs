//! Hub configuration
//!
//! Defaults can be overridden from the environment:
//!
//! ```text
//! EVENT_HUB_DATA_DIR=.rt
//! EVENT_HUB_BIND=0.0.0.0:3003
//! EVENT_HUB_POLL_MS=250
//! EVENT_HUB_KEEPALIVE_SECS=15
//! EVENT_HUB_SESSION_DEADLINE_SECS=300
//! EVENT_HUB_CHANNEL_CAPACITY=64
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{HubError, HubResult};
use crate::event_store::StoreConfig;

/// Timing and buffering for stream sessions
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often a tailing session checks the log for growth
    pub poll_interval: Duration,
    /// Idle time after which a keepalive is emitted
    pub keepalive_interval: Duration,
    /// Hard lifetime of a session; the client reconnects with its last id
    pub session_deadline: Duration,
    /// Events buffered between a session task and its transport
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            keepalive_interval: Duration::from_secs(15),
            session_deadline: Duration::from_secs(300),
            channel_capacity: 64,
        }
    }
}

/// Top-level configuration for the hub and its HTTP front
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub store: StoreConfig,
    pub session: SessionConfig,
    pub bind_addr: SocketAddr,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            session: SessionConfig::default(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3003)),
        }
    }
}

impl HubConfig {
    /// Config rooted at `data_dir` with default timings
    pub fn with_data_dir<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            store: StoreConfig::new(data_dir.into()),
            ..Default::default()
        }
    }

    /// Load from process environment
    pub fn from_env() -> HubResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> HubResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("EVENT_HUB_DATA_DIR") {
            config.store.data_dir = PathBuf::from(dir);
        }
        if let Some(addr) = parse_var::<SocketAddr>(&lookup, "EVENT_HUB_BIND")? {
            config.bind_addr = addr;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "EVENT_HUB_POLL_MS")? {
            config.session.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "EVENT_HUB_KEEPALIVE_SECS")? {
            config.session.keepalive_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "EVENT_HUB_SESSION_DEADLINE_SECS")? {
            config.session.session_deadline = Duration::from_secs(secs);
        }
        if let Some(cap) = parse_var::<usize>(&lookup, "EVENT_HUB_CHANNEL_CAPACITY")? {
            config.session.channel_capacity = cap;
        }

        config.validate()?;
        Ok(config)
    }

    /// Override the listening port (first CLI argument)
    pub fn with_port_arg(mut self, arg: Option<String>) -> HubResult<Self> {
        if let Some(arg) = arg {
            let port = arg
                .parse::<u16>()
                .map_err(|_| HubError::Config(format!("invalid port argument: {}", arg)))?;
            self.bind_addr.set_port(port);
        }
        Ok(self)
    }

    fn validate(&self) -> HubResult<()> {
        if self.session.poll_interval.is_zero() {
            return Err(HubError::Config("poll interval must be non-zero".to_string()));
        }
        if self.session.keepalive_interval.is_zero() {
            return Err(HubError::Config("keepalive interval must be non-zero".to_string()));
        }
        if self.session.session_deadline.is_zero() {
            return Err(HubError::Config("session deadline must be non-zero".to_string()));
        }
        if self.session.channel_capacity == 0 {
            return Err(HubError::Config("channel capacity must be non-zero".to_string()));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> HubResult<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| HubError::Config(format!("{} has invalid value {:?}", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = HubConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind_addr.port(), 3003);
        assert_eq!(config.session.keepalive_interval, Duration::from_secs(15));
        assert_eq!(config.session.session_deadline, Duration::from_secs(300));
        assert_eq!(config.store.events_path(), PathBuf::from(".rt/events.ndjson"));
    }

    #[test]
    fn test_env_overrides() {
        let config = HubConfig::from_lookup(lookup_from(&[
            ("EVENT_HUB_DATA_DIR", "/var/lib/hub"),
            ("EVENT_HUB_BIND", "127.0.0.1:9000"),
            ("EVENT_HUB_POLL_MS", "50"),
            ("EVENT_HUB_SESSION_DEADLINE_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(config.store.sequence_path(), PathBuf::from("/var/lib/hub/seq.txt"));
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.session.poll_interval, Duration::from_millis(50));
        assert_eq!(config.session.session_deadline, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = HubConfig::from_lookup(lookup_from(&[("EVENT_HUB_POLL_MS", "soon")])).unwrap_err();
        assert!(matches!(err, HubError::Config(_)));

        let err = HubConfig::from_lookup(lookup_from(&[("EVENT_HUB_CHANNEL_CAPACITY", "0")])).unwrap_err();
        assert!(matches!(err, HubError::Config(_)));
    }

    #[test]
    fn test_port_arg() {
        let config = HubConfig::default().with_port_arg(Some("8080".to_string())).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);

        assert!(HubConfig::default().with_port_arg(Some("http".to_string())).is_err());
        assert_eq!(HubConfig::default().with_port_arg(None).unwrap().bind_addr.port(), 3003);
    }
}
