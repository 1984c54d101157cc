// Time helpers for logging and profiling

use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current time in milliseconds since the epoch
///
/// This is used to stamp log messages, it does not need to
/// be monotonic.
pub fn get_current_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time is before the unix epoch")
        .as_millis()
}
