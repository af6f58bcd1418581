//! Event Log - append-only NDJSON store
//!
//! One writer appends whole lines; any number of readers scan the file
//! independently. Readers only ever consume up to the last `\n`, so a
//! record that is still being written (or was cut short by a crash) is
//! invisible until it is complete.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{HubError, HubResult};
use crate::topic::TopicFilter;
use crate::types::Event;

/// Configuration for the on-disk layout
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the runtime directory
    pub data_dir: PathBuf,
    /// Whether every append is fsynced before returning
    pub sync_on_append: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".rt"),
            sync_on_append: true,
        }
    }
}

impl StoreConfig {
    /// Create config with custom data directory
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get path to the active log
    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join("events.ndjson")
    }

    /// Get path to the durable sequence counter
    pub fn sequence_path(&self) -> PathBuf {
        self.data_dir.join("seq.txt")
    }

    /// Get path to archive directory
    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("archive")
    }
}

/// Byte position in the active log
///
/// Only ever points just past a `\n` (or at 0), so reading from it never
/// starts in the middle of a record written by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogCursor(u64);

impl LogCursor {
    pub const START: LogCursor = LogCursor(0);

    pub fn new(offset: u64) -> Self {
        LogCursor(offset)
    }

    pub fn offset(&self) -> u64 {
        self.0
    }
}

/// Archives kept in memory for readers catching up after a rotation
const ROTATION_HISTORY: usize = 16;

/// Append-only event log backed by a single NDJSON file
pub struct EventLog {
    config: StoreConfig,
    /// Serializes appends (single-writer discipline)
    writer: Mutex<()>,
    /// Bumped by each rotation before the active file is swapped
    epoch: AtomicU64,
    /// `(epoch, archive)` for recent rotations, oldest first
    rotations: Mutex<VecDeque<(u64, PathBuf)>>,
}

impl EventLog {
    /// Open the log, creating the data directory and an empty file if needed
    pub fn open(config: StoreConfig) -> HubResult<Self> {
        fs::create_dir_all(config.data_dir())?;

        let cleaned = crate::utils::cleanup_temp_files(config.data_dir())?;
        if cleaned > 0 {
            tracing::info!(cleaned, "removed leftover temp files");
        }

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(config.events_path())?;

        Ok(Self {
            config,
            writer: Mutex::new(()),
            epoch: AtomicU64::new(0),
            rotations: Mutex::new(VecDeque::new()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn path(&self) -> PathBuf {
        self.config.events_path()
    }

    /// Durably append one record as the new last line
    ///
    /// The line and its terminator go out in a single `write_all` on an
    /// O_APPEND handle.
    pub fn append(&self, event: &Event) -> HubResult<()> {
        let mut line = event
            .to_json_line()
            .map_err(|e| HubError::invalid_payload(format!("unserializable data: {}", e)))?;
        line.push('\n');

        let _guard = self.writer.lock();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path())?;
        let before = file.metadata()?.len();

        let written = file.write_all(line.as_bytes()).and_then(|_| {
            if self.config.sync_on_append {
                file.sync_data()
            } else {
                Ok(())
            }
        });

        if let Err(e) = written {
            // Never leave a fragment for the next record to be glued onto
            if let Err(trunc) = file.set_len(before) {
                tracing::error!(error = %trunc, "could not trim failed append");
            }
            return Err(e.into());
        }

        Ok(())
    }

    /// Run `f` while holding the append lock
    ///
    /// Rotation uses this so no append can land between archiving the log
    /// and swapping in an empty one.
    pub(crate) fn with_writer_lock<T>(&self, f: impl FnOnce() -> HubResult<T>) -> HubResult<T> {
        let _guard = self.writer.lock();
        f()
    }

    /// Number of rotations this process has performed on the log
    ///
    /// A cursor is only meaningful within the epoch it was taken in.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Record that the active log was archived at `archive`
    ///
    /// Called by rotation under the append lock, after the archive is
    /// durable and before the active file is replaced.
    pub(crate) fn mark_rotated(&self, archive: PathBuf) -> u64 {
        let mut rotations = self.rotations.lock();
        let epoch = self.epoch.load(Ordering::SeqCst) + 1;
        rotations.push_back((epoch, archive));
        while rotations.len() > ROTATION_HISTORY {
            rotations.pop_front();
        }
        self.epoch.store(epoch, Ordering::SeqCst);
        epoch
    }

    /// Records a reader at `cursor` in epoch `from` has not seen yet
    /// because the log was rotated underneath it
    ///
    /// The archive that closed `from` is read from `cursor`, any later
    /// archives in full. Also returns the epoch the reader has caught up
    /// to; it should continue from `LogCursor::START` in that epoch.
    pub fn read_rotated(&self, from: u64, cursor: LogCursor) -> HubResult<(Vec<Event>, u64)> {
        let archives: Vec<(u64, PathBuf)> = self
            .rotations
            .lock()
            .iter()
            .filter(|(epoch, _)| *epoch > from)
            .cloned()
            .collect();

        if archives.first().map(|(epoch, _)| *epoch) != Some(from + 1) {
            tracing::warn!(from, "rotation history exhausted, archived records skipped");
        }

        let mut events = Vec::new();
        let mut reached = from;
        for (epoch, path) in archives {
            let start = if epoch == from + 1 { cursor } else { LogCursor::START };
            let (mut chunk, _) = read_file_since(&path, start)?;
            events.append(&mut chunk);
            reached = epoch;
        }

        Ok((events, reached))
    }

    /// Current size of the active log; a missing file counts as empty
    pub fn size_marker(&self) -> HubResult<LogCursor> {
        match fs::metadata(self.path()) {
            Ok(meta) => Ok(LogCursor(meta.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(LogCursor::START),
            Err(e) => Err(e.into()),
        }
    }

    /// All complete records appended after `cursor`, plus the cursor to
    /// resume from
    ///
    /// Malformed lines are logged and skipped.
    pub fn read_since(&self, cursor: LogCursor) -> HubResult<(Vec<Event>, LogCursor)> {
        read_file_since(&self.path(), cursor)
    }

    /// Events with `id > last_seen_id` whose topic passes `filter`, in
    /// ascending id order
    pub fn read_from(&self, last_seen_id: u64, filter: &TopicFilter) -> HubResult<Vec<Event>> {
        self.replay_from(last_seen_id, filter).map(|(events, _)| events)
    }

    /// Like [`read_from`](Self::read_from), also returning the cursor the
    /// scan stopped at so tailing can continue without a gap
    pub fn replay_from(
        &self,
        last_seen_id: u64,
        filter: &TopicFilter,
    ) -> HubResult<(Vec<Event>, LogCursor)> {
        let (events, cursor) = self.read_since(LogCursor::START)?;
        let events = events
            .into_iter()
            .filter(|e| e.id > last_seen_id && filter.matches(&e.topic))
            .collect();
        Ok((events, cursor))
    }

    /// Id of the last parseable record, if any
    pub fn last_event_id(&self) -> HubResult<Option<u64>> {
        let (events, _) = self.read_since(LogCursor::START)?;
        Ok(events.iter().map(|e| e.id).max())
    }
}

fn read_file_since(path: &Path, cursor: LogCursor) -> HubResult<(Vec<Event>, LogCursor)> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), cursor)),
        Err(e) => return Err(e.into()),
    };

    file.seek(SeekFrom::Start(cursor.0))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    // Only complete lines are consumed
    let consumed = match buf.iter().rposition(|&b| b == b'\n') {
        Some(pos) => pos + 1,
        None => return Ok((Vec::new(), cursor)),
    };

    let events = parse_lines(path, &buf[..consumed], cursor.0);
    Ok((events, LogCursor(cursor.0 + consumed as u64)))
}

fn parse_lines(path: &Path, bytes: &[u8], base: u64) -> Vec<Event> {
    records(bytes, base)
        .filter_map(|record| match record {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping record");
                None
            }
        })
        .collect()
}

/// Non-blank lines of `bytes` parsed as records
///
/// `base` is the file offset of `bytes[0]`, so errors carry the record's
/// position in the file rather than in the chunk.
fn records(bytes: &[u8], base: u64) -> impl Iterator<Item = HubResult<Event>> + '_ {
    bytes
        .split_inclusive(|&b| b == b'\n')
        .scan(base, |offset, raw| {
            let at = *offset;
            *offset += raw.len() as u64;
            Some((at, raw))
        })
        .filter_map(|(at, raw)| {
            let line = String::from_utf8_lossy(raw);
            let line = line.trim();
            (!line.is_empty()).then(|| Event::parse_record(line, at))
        })
}
