//! Log Rotation and Archive Management
//!
//! Rotation moves the whole active log into `archive/` and swaps in an
//! empty log. Live sessions see the size marker shrink and restart their
//! cursor at the beginning of the new file.

use std::fs::{self, File};
use std::path::PathBuf;

use super::store::{EventLog, LogCursor, StoreConfig};
use crate::error::HubResult;
use crate::types::Event;
use crate::utils::atomic_write;

/// Log rotation manager for event archives
pub struct LogRotation {
    config: StoreConfig,
}

/// Information about an archive file
#[derive(Debug, Clone)]
pub struct ArchiveInfo {
    pub path: PathBuf,
    pub size: u64,
    pub first_id: u64,
    pub last_id: u64,
    pub event_count: usize,
}

impl LogRotation {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    /// Archive the active log of `log` and replace it with an empty one
    ///
    /// Holds the append lock for the whole operation.
    ///
    /// # Returns
    /// * `Ok(Some(path))` - Path to the archive file
    /// * `Ok(None)` - The active log was empty
    pub fn rotate(&self, log: &EventLog) -> HubResult<Option<PathBuf>> {
        log.with_writer_lock(|| {
            let events_path = self.config.events_path();
            if log.size_marker()? == LogCursor::START {
                return Ok(None);
            }

            let (events, _) = log.read_since(LogCursor::START)?;
            let first_id = events.iter().map(|e| e.id).min().unwrap_or(0);
            let last_id = events.iter().map(|e| e.id).max().unwrap_or(0);

            let archive_dir = self.config.archive_dir();
            fs::create_dir_all(&archive_dir)?;

            let archive_path = self.unique_archive_path(first_id, last_id);
            fs::copy(&events_path, &archive_path)?;
            File::open(&archive_path)?.sync_all()?;

            // Readers must see the new epoch before they can see the new file
            let epoch = log.mark_rotated(archive_path.clone());
            atomic_write(&events_path, "")?;

            tracing::info!(
                events = events.len(),
                first_id,
                last_id,
                epoch,
                archive = %archive_path.display(),
                "rotated event log"
            );

            Ok(Some(archive_path))
        })
    }

    fn unique_archive_path(&self, first_id: u64, last_id: u64) -> PathBuf {
        let archive_dir = self.config.archive_dir();
        let base = format!("events_{}_to_{}", first_id, last_id);

        let mut path = archive_dir.join(format!("{}.ndjson", base));
        let mut n = 1;
        while path.exists() {
            path = archive_dir.join(format!("{}.{}.ndjson", base, n));
            n += 1;
        }
        path
    }

    /// Extract `(first, last)` from an archive file name
    fn parse_archive_name(path: &std::path::Path) -> Option<(u64, u64)> {
        let name = path.file_name()?.to_str()?;
        let rest = name.strip_prefix("events_")?;
        let rest = rest.strip_suffix(".ndjson")?;
        // Drop a `.N` disambiguation suffix if present
        let rest = rest.split('.').next()?;
        let (first, last) = rest.split_once("_to_")?;
        Some((first.parse().ok()?, last.parse().ok()?))
    }

    /// List all archive files, oldest first
    pub fn list_archives(&self) -> HubResult<Vec<ArchiveInfo>> {
        let archive_dir = self.config.archive_dir();

        if !archive_dir.exists() {
            return Ok(Vec::new());
        }

        let mut archives = Vec::new();

        for entry in fs::read_dir(&archive_dir)? {
            let entry = entry?;
            let path = entry.path();

            let Some((first_id, last_id)) = Self::parse_archive_name(&path) else {
                continue;
            };

            let size = entry.metadata()?.len();
            let event_count = Self::count_events(&path)?;

            archives.push(ArchiveInfo {
                path,
                size,
                first_id,
                last_id,
                event_count,
            });
        }

        archives.sort_by_key(|a| (a.last_id, a.first_id));
        Ok(archives)
    }

    /// Highest id recorded by any archive file name
    ///
    /// Only file names are inspected; archive contents are never read.
    pub fn last_archived_id(&self) -> HubResult<Option<u64>> {
        let archive_dir = self.config.archive_dir();
        if !archive_dir.exists() {
            return Ok(None);
        }

        let mut last = None;
        for entry in fs::read_dir(&archive_dir)? {
            if let Some((_, last_id)) = Self::parse_archive_name(&entry?.path()) {
                last = last.max(Some(last_id));
            }
        }
        Ok(last)
    }

    fn count_events(path: &std::path::Path) -> HubResult<usize> {
        let content = fs::read_to_string(path)?;
        Ok(content
            .lines()
            .filter(|line| Event::from_json_line(line).is_ok())
            .count())
    }
}
