//! Utility functions and helpers
//!
//! Timestamps and crash-safe file replacement.

pub mod atomic;
pub mod time;

pub use atomic::{atomic_write, cleanup_temp_files};
pub use time::unix_now;
