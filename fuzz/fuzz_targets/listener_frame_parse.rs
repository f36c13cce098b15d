#![no_main]

use libfuzzer_sys::fuzz_target;
use rill_protocol::{parse_listener_frame, ListenerFrame, PONG_FRAME};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);

    match parse_listener_frame(&raw) {
        Ok(ListenerFrame::Pong) => {
            assert_eq!(raw, PONG_FRAME);
        }
        Ok(ListenerFrame::Heartbeat(heartbeat)) => {
            // JSON numbers are always finite.
            assert!(heartbeat.volume.is_finite());
            assert!(heartbeat.current_time.is_finite());
        }
        Err(error) => {
            assert!(!error.to_string().is_empty());
        }
    }
});
