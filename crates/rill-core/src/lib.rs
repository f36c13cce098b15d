//! Foundational low-level utilities shared across Rill crates.
//!
//! Provides time helpers used by session metering, settlement, and
//! keepalive scheduling.

pub mod time_utils;

pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms, elapsed_seconds_between};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_utils_round_trip_bounds() {
        let now_s = current_unix_timestamp();
        let now_ms = current_unix_timestamp_ms();
        let now_ms_s = now_ms / 1_000;
        assert!(now_ms_s >= now_s);
        assert!(now_ms_s <= now_s.saturating_add(1));
    }

    #[test]
    fn elapsed_seconds_between_is_clamped_and_fractional() {
        assert_eq!(elapsed_seconds_between(1_000, 3_500), 2.5);
        assert_eq!(elapsed_seconds_between(3_500, 1_000), 0.0);
        assert_eq!(elapsed_seconds_between(0, 0), 0.0);
    }
}
