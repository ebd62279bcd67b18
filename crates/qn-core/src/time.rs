//! Unix-epoch millisecond timestamps used across payloads and sync tokens.

use std::time::{SystemTime, UNIX_EPOCH};

pub type UnixMillis = i64;

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn now_ms() -> UnixMillis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as UnixMillis
}
