//! Sequence Authority - durable, gap-free event ids
//!
//! The counter lives in `seq.txt` and holds the last id handed out.
//! On open it is reconciled against the log: the starting value is the
//! maximum of the persisted counter, the last id in the active log, and
//! the last id recorded by any archive. A lost or stale counter file can
//! therefore never cause an id to be reused.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::rotation::LogRotation;
use super::store::EventLog;
use crate::error::HubResult;
use crate::utils::atomic_write;

/// Hands out strictly increasing event ids
pub struct SequenceAuthority {
    path: PathBuf,
    /// Last id handed out (0 before the first event)
    current: Mutex<u64>,
}

impl SequenceAuthority {
    /// Open the counter for `log`, reconciling it with the log's content
    pub fn open(log: &EventLog) -> HubResult<Self> {
        let path = log.config().sequence_path();
        let persisted = read_counter(&path);

        let from_log = log.last_event_id().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not scan log for last id");
            None
        });
        let from_archive = LogRotation::new(log.config().clone())
            .last_archived_id()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "could not scan archives for last id");
                None
            });

        let start = [persisted, from_log, from_archive]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(0);

        if persisted != Some(start) {
            if persisted.is_some() || start > 0 {
                tracing::warn!(
                    persisted = ?persisted,
                    log = ?from_log,
                    archive = ?from_archive,
                    start,
                    "sequence counter reconciled against log"
                );
            }
            atomic_write(&path, &format!("{}\n", start))?;
        }

        Ok(Self {
            path,
            current: Mutex::new(start),
        })
    }

    /// Allocate the next id
    ///
    /// Increment and persist happen under one lock. The new value is on
    /// disk before it is returned, so a crash can skip an id but never
    /// hand one out twice. If the write fails nothing is consumed.
    pub fn next(&self) -> HubResult<u64> {
        let mut current = self.current.lock();
        let next = *current + 1;
        atomic_write(&self.path, &format!("{}\n", next))?;
        *current = next;
        Ok(next)
    }

    /// Give back `id` if it is still the latest one handed out
    ///
    /// Used when the append for `id` failed, so the next ingest reuses it
    /// and the log stays gap-free. Returns whether the id was released.
    pub fn release(&self, id: u64) -> bool {
        let mut current = self.current.lock();
        if *current != id || id == 0 {
            return false;
        }
        match atomic_write(&self.path, &format!("{}\n", id - 1)) {
            Ok(()) => {
                *current = id - 1;
                true
            }
            Err(e) => {
                tracing::warn!(id, error = %e, "could not release id, leaving a gap");
                false
            }
        }
    }

    /// Last id handed out (0 if none)
    pub fn current(&self) -> u64 {
        *self.current.lock()
    }
}

/// `None` when the file is missing, unreadable or corrupt
fn read_counter(path: &Path) -> Option<u64> {
    match fs::read_to_string(path) {
        Ok(content) => match content.trim().parse::<u64>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(path = %path.display(), "sequence counter is corrupt");
                None
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "sequence counter unreadable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::StoreConfig;
    use crate::types::Event;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_log() -> (EventLog, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let log = EventLog::open(StoreConfig::new(temp_dir.path())).unwrap();
        (log, temp_dir)
    }

    #[test]
    fn test_starts_at_one() {
        let (log, _temp_dir) = create_test_log();
        let seq = SequenceAuthority::open(&log).unwrap();

        assert_eq!(seq.current(), 0);
        assert_eq!(seq.next().unwrap(), 1);
        assert_eq!(seq.next().unwrap(), 2);
        assert_eq!(
            fs::read_to_string(log.config().sequence_path()).unwrap(),
            "2\n"
        );
    }

    #[test]
    fn test_survives_restart() {
        let (log, _temp_dir) = create_test_log();
        {
            let seq = SequenceAuthority::open(&log).unwrap();
            seq.next().unwrap();
            seq.next().unwrap();
        }

        let seq = SequenceAuthority::open(&log).unwrap();
        assert_eq!(seq.next().unwrap(), 3);
    }

    #[test]
    fn test_recovers_from_log_when_counter_corrupt() {
        let (log, _temp_dir) = create_test_log();
        for id in 1..=4 {
            log.append(&Event::new(id, "a.b", json!(id), false)).unwrap();
        }
        fs::write(log.config().sequence_path(), "garbage").unwrap();

        let seq = SequenceAuthority::open(&log).unwrap();
        assert_eq!(seq.current(), 4);
        assert_eq!(seq.next().unwrap(), 5);
    }

    #[test]
    fn test_counter_ahead_of_log_wins() {
        let (log, _temp_dir) = create_test_log();
        log.append(&Event::new(1, "a.b", json!(null), false)).unwrap();
        fs::write(log.config().sequence_path(), "9\n").unwrap();

        let seq = SequenceAuthority::open(&log).unwrap();
        assert_eq!(seq.next().unwrap(), 10);
    }

    #[test]
    fn test_log_ahead_of_counter_wins() {
        let (log, _temp_dir) = create_test_log();
        for id in 1..=3 {
            log.append(&Event::new(id, "a.b", json!(null), false)).unwrap();
        }
        fs::write(log.config().sequence_path(), "1\n").unwrap();

        let seq = SequenceAuthority::open(&log).unwrap();
        assert_eq!(seq.next().unwrap(), 4);
        assert_eq!(
            fs::read_to_string(log.config().sequence_path()).unwrap(),
            "4\n"
        );
    }

    #[test]
    fn test_release_only_latest() {
        let (log, _temp_dir) = create_test_log();
        let seq = SequenceAuthority::open(&log).unwrap();

        assert_eq!(seq.next().unwrap(), 1);
        assert_eq!(seq.next().unwrap(), 2);
        assert!(!seq.release(1));
        assert!(seq.release(2));
        assert_eq!(seq.next().unwrap(), 2);
    }

    #[test]
    fn test_concurrent_next_has_no_duplicates() {
        let (log, _temp_dir) = create_test_log();
        let seq = Arc::new(SequenceAuthority::open(&log).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let seq = seq.clone();
                std::thread::spawn(move || (0..25).map(|_| seq.next().unwrap()).collect::<Vec<_>>())
            })
            .collect();

        let mut ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();

        assert_eq!(ids, (1..=100).collect::<Vec<u64>>());
        assert_eq!(seq.current(), 100);
    }
}
