//! Time and timestamp utilities

use chrono::Utc;

/// Signed Unix timestamp in seconds, as carried on the wire
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}
