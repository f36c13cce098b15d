//! Playback-progress anomaly detection.
//!
//! Compares the playback advance the client reports between heartbeats with
//! the wall-clock time that actually elapsed. A best-effort fraud guard,
//! not a precise clock: the ±2x band tolerates network jitter while
//! rejecting fast-forward and rewind patterns typical of spoofed clients.

/// Classification of one progress observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressVerdict {
    Normal,
    /// Irregular but plausible; warn and continue.
    Mild,
    /// Implausible; terminate the session.
    Severe,
}

/// Pure classification of `(expected wall-clock advance, reported playback
/// advance)`, both in seconds.
pub fn classify_progress(expected_elapsed: f64, reported_delta: f64) -> ProgressVerdict {
    if reported_delta < 0.0 {
        // Rewind between heartbeats is tampering regardless of magnitude.
        return ProgressVerdict::Severe;
    }
    let ratio = if expected_elapsed > 0.0 {
        reported_delta / expected_elapsed
    } else {
        1.0
    };
    if (0.5..=2.0).contains(&ratio) {
        ProgressVerdict::Normal
    } else if (ratio > 0.3 && ratio < 0.5) || (ratio > 2.0 && ratio < 2.5) {
        ProgressVerdict::Mild
    } else {
        ProgressVerdict::Severe
    }
}

/// One classified interval between consecutive heartbeats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressObservation {
    pub expected_elapsed: f64,
    pub reported_delta: f64,
    pub ratio: f64,
    pub verdict: ProgressVerdict,
}

/// Per-session progress state. Only ever mutated by the session's single
/// receive loop, so heartbeat ordering is preserved without locking.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last_heartbeat_unix_ms: Option<u64>,
    last_reported_position: f64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one heartbeat and classifies the interval since the previous
    /// one. The first heartbeat only establishes a baseline.
    pub fn observe(
        &mut self,
        now_unix_ms: u64,
        reported_position: f64,
    ) -> Option<ProgressObservation> {
        let observation = self.last_heartbeat_unix_ms.map(|last_unix_ms| {
            let expected_elapsed = rill_core::elapsed_seconds_between(last_unix_ms, now_unix_ms);
            let reported_delta = reported_position - self.last_reported_position;
            let ratio = if expected_elapsed > 0.0 {
                reported_delta / expected_elapsed
            } else {
                1.0
            };
            ProgressObservation {
                expected_elapsed,
                reported_delta,
                ratio,
                verdict: classify_progress(expected_elapsed, reported_delta),
            }
        });
        self.last_heartbeat_unix_ms = Some(now_unix_ms);
        self.last_reported_position = reported_position;
        observation
    }
}
