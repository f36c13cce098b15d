#![no_main]

use libfuzzer_sys::fuzz_target;
use rill_engine::{classify_progress, ProgressVerdict};

fuzz_target!(|pair: (f64, f64)| {
    let (expected_elapsed, reported_delta) = pair;

    let verdict = classify_progress(expected_elapsed, reported_delta);

    // Rewinds must always be flagged as severe.
    if reported_delta < 0.0 {
        assert_eq!(verdict, ProgressVerdict::Severe);
    }
    // A report that matches wall-clock exactly is never penalized.
    if reported_delta >= 0.0 && (reported_delta - expected_elapsed).abs() < f64::EPSILON {
        assert_eq!(verdict, ProgressVerdict::Normal);
    }
});
