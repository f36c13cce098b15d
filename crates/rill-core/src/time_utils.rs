/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Returns the current Unix timestamp in seconds.
pub fn current_unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Returns the fractional seconds elapsed between two millisecond
/// timestamps, clamped to zero when `end_unix_ms` precedes `start_unix_ms`.
pub fn elapsed_seconds_between(start_unix_ms: u64, end_unix_ms: u64) -> f64 {
    end_unix_ms.saturating_sub(start_unix_ms) as f64 / 1_000.0
}
