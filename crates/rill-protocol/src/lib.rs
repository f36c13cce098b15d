//! Wire schema for the listening WebSocket: inbound heartbeat frames,
//! outbound earnings/warning/error frames, liveness probe sentinels, and
//! the close codes the gateway uses for connect-time precondition failures.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Liveness probe the server sends on the keepalive interval.
pub const PING_FRAME: &str = "ping";
/// Liveness acknowledgement the client answers with; ignorable.
pub const PONG_FRAME: &str = "pong";

/// Close code for a campaign that is missing or not in the paid state.
pub const CLOSE_CODE_CAMPAIGN_INACTIVE: u16 = 4000;
/// Close code when no open listening session exists for the listener.
pub const CLOSE_CODE_NO_ACTIVE_SESSION: u16 = 4001;
/// Standard normal-closure code used everywhere else.
pub const CLOSE_CODE_NORMAL: u16 = 1000;

/// Playback state reported by the client on each heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatFrame {
    pub is_playing: bool,
    pub volume: f64,
    /// Reported playback position in seconds.
    pub current_time: f64,
}

/// A classified inbound text frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ListenerFrame {
    /// Liveness acknowledgement; dropped silently.
    Pong,
    Heartbeat(HeartbeatFrame),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawListenerFrame {
    Heartbeat(HeartbeatFrame),
}

/// Classifies one inbound text frame.
///
/// Anything that is not the pong sentinel must be a JSON object tagged
/// `"type":"heartbeat"` with all playback fields present; everything else
/// is malformed and terminates the session upstream.
pub fn parse_listener_frame(raw: &str) -> Result<ListenerFrame> {
    if raw == PONG_FRAME {
        return Ok(ListenerFrame::Pong);
    }
    let frame = serde_json::from_str::<RawListenerFrame>(raw)
        .context("malformed listener frame: expected pong sentinel or heartbeat JSON")?;
    match frame {
        RawListenerFrame::Heartbeat(heartbeat) => Ok(ListenerFrame::Heartbeat(heartbeat)),
    }
}

/// Server-to-client frames, serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Informational projection of what the session has earned so far.
    /// Settlement recomputes the real amount against the budget.
    Earnings {
        #[serde(rename = "earnedXRP")]
        earned_xrp: f64,
        #[serde(rename = "elapsedSeconds")]
        elapsed_seconds: f64,
    },
    /// Mild anomaly; the session continues.
    Warning { message: String, details: String },
    /// Terminal condition, sent just before close.
    Error { message: String, details: String },
}

impl OutboundFrame {
    pub fn earnings(earned_xrp: f64, elapsed_seconds: f64) -> Self {
        Self::Earnings {
            earned_xrp,
            elapsed_seconds,
        }
    }

    pub fn warning(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Warning {
            message: message.into(),
            details: details.into(),
        }
    }

    pub fn error(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            details: details.into(),
        }
    }

    pub fn to_text(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize outbound frame")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_parse_listener_frame_accepts_pong_sentinel() {
        assert_eq!(
            parse_listener_frame("pong").expect("parse"),
            ListenerFrame::Pong
        );
    }

    #[test]
    fn unit_parse_listener_frame_accepts_heartbeat() {
        let frame = parse_listener_frame(
            r#"{"type":"heartbeat","is_playing":true,"volume":50,"current_time":12.5}"#,
        )
        .expect("parse");
        let ListenerFrame::Heartbeat(heartbeat) = frame else {
            panic!("expected heartbeat frame");
        };
        assert!(heartbeat.is_playing);
        assert_eq!(heartbeat.volume, 50.0);
        assert_eq!(heartbeat.current_time, 12.5);
    }

    #[test]
    fn unit_parse_listener_frame_rejects_non_json() {
        let error = parse_listener_frame("not json").expect_err("should fail");
        assert!(error.to_string().contains("malformed listener frame"));
    }

    #[test]
    fn unit_parse_listener_frame_rejects_missing_fields() {
        assert!(parse_listener_frame(r#"{"type":"heartbeat","is_playing":true}"#).is_err());
    }

    #[test]
    fn unit_parse_listener_frame_rejects_unknown_type_tag() {
        assert!(parse_listener_frame(r#"{"type":"telemetry","volume":10}"#).is_err());
    }

    #[test]
    fn functional_outbound_frames_serialize_with_wire_field_names() {
        let earnings = OutboundFrame::earnings(0.05, 5.0).to_text().expect("text");
        let value: serde_json::Value = serde_json::from_str(&earnings).expect("json");
        assert_eq!(value["type"], "earnings");
        assert_eq!(value["earnedXRP"], 0.05);
        assert_eq!(value["elapsedSeconds"], 5.0);

        let warning = OutboundFrame::warning("irregular playback progress detected", "unstable")
            .to_text()
            .expect("text");
        let value: serde_json::Value = serde_json::from_str(&warning).expect("json");
        assert_eq!(value["type"], "warning");
        assert_eq!(value["details"], "unstable");

        let error = OutboundFrame::error("playback is paused", "")
            .to_text()
            .expect("text");
        let value: serde_json::Value = serde_json::from_str(&error).expect("json");
        assert_eq!(value["type"], "error");
    }
}
