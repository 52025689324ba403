use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock seconds. Only the shell reads the clock; everything below it takes `now_unix`.
pub fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}
