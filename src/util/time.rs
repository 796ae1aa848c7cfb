use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current unix time in milliseconds, as stamped on delayed deliveries.
#[inline]
pub fn now_unix_millis() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    now.as_millis() as i64
}
