//! Timestamp utilities

use chrono::Utc;

/// Wall-clock milliseconds since the Unix epoch
///
/// This is the `time` field of every player state snapshot.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert whole seconds to a duration
pub fn secs_to_duration(secs: u64) -> std::time::Duration {
    std::time::Duration::from_secs(secs)
}
