//! Atomic file operations
//!
//! Used for the sequence counter file and for swapping in an empty log
//! during rotation.
//!
//! # Pattern
//!
//! 1. Write to a temporary file (.tmp)
//! 2. Call sync_all() to flush to disk
//! 3. Rename temp file to final path (atomic on most filesystems)
//!
//! Readers of the final path observe either the old or the new content,
//! never a partial write.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Atomically replace the content of `path`
///
/// # Example
///
/// ```ignore
/// atomic_write(".rt/seq.txt", "42\n")?;
/// ```
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &str) -> io::Result<()> {
    let path = path.as_ref();
    let temp_path = path.with_extension("tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = File::create(&temp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;

    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Remove leftover `.tmp` files from interrupted writes
///
/// Called once when the store is opened.
pub fn cleanup_temp_files<P: AsRef<Path>>(dir: P) -> io::Result<usize> {
    let dir = dir.as_ref();
    let mut cleaned = 0;

    if !dir.exists() {
        return Ok(0);
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();

        if path.is_file() && path.extension().map(|e| e == "tmp").unwrap_or(false) {
            fs::remove_file(&path)?;
            cleaned += 1;
        }
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_replaces_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("seq.txt");

        atomic_write(&path, "1\n").unwrap();
        atomic_write(&path, "2\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "2\n");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("rt").join("seq.txt");

        atomic_write(&path, "7\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "7\n");
    }

    #[test]
    fn test_cleanup_temp_files() {
        let temp_dir = TempDir::new().unwrap();

        fs::write(temp_dir.path().join("seq.tmp"), "3").unwrap();
        fs::write(temp_dir.path().join("events.tmp"), "").unwrap();
        fs::write(temp_dir.path().join("events.ndjson"), "").unwrap();

        let cleaned = cleanup_temp_files(temp_dir.path()).unwrap();
        assert_eq!(cleaned, 2);
        assert!(temp_dir.path().join("events.ndjson").exists());
    }

    #[test]
    fn test_cleanup_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        assert_eq!(cleanup_temp_files(missing).unwrap(), 0);
    }
}
