//! Timestamp helpers shared by the packet envelope and the session layer.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the UNIX epoch.
///
/// A clock set before 1970 yields `0`, which every validity check rejects.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or_default()
}

/// Check that `timestamp_ms` lies within `max_skew` of the local clock, in
/// either direction.
pub fn verify_timestamp(timestamp_ms: u64, max_skew: Duration) -> bool {
    let current = current_timestamp_ms();
    if current == 0 {
        return false;
    }

    let skew_ms = max_skew.as_millis() as u64;
    current.abs_diff(timestamp_ms) <= skew_ms
}
