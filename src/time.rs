//! Timestamp helpers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// RFC 3339 timestamp with second precision, UTC (`2026-10-18T09:30:00Z`)
pub fn rfc3339(at: SystemTime) -> String {
    humantime::format_rfc3339_seconds(at).to_string()
}

pub fn now_rfc3339() -> String {
    rfc3339(SystemTime::now())
}

/// Calendar date and wall-clock time (UTC) of `at`, for human-facing text
pub fn date_and_time(at: SystemTime) -> (String, String) {
    let stamp = rfc3339(at);
    let date = stamp.get(..10).unwrap_or(&stamp).to_string();
    let time = stamp.get(11..19).unwrap_or_default().to_string();
    (date, time)
}

pub fn from_unix_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

pub fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
