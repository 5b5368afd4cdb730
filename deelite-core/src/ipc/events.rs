//! Event types broadcast to a UI bridge or the CLI host.
//!
//! ## Channels
//!
//! | Event | Subscribe with |
//! |-------|----------------|
//! | `AssistantStatusEvent` | `VoiceAssistant::subscribe_status` |
//! | `InputLevelEvent` | `VoiceAssistant::subscribe_levels` |

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

// ---------------------------------------------------------------------------
// Assistant status
// ---------------------------------------------------------------------------

/// Emitted whenever the assistant's externally visible state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantStatusEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub status: AssistantStatus,
    /// Human-readable detail (the failure reason when `Errored`).
    pub detail: Option<String>,
    /// Error category when `Errored`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// Tag form of the assistant state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssistantStatus {
    /// Microphone opening or the live session not yet acknowledged.
    Connecting,
    /// Session open, nothing queued for playback.
    Listening,
    /// Model audio is scheduled or playing.
    Speaking,
    /// Torn down after an explicit close or a graceful remote close.
    Closed,
    /// Torn down after a failure. Reopen to retry.
    Errored,
}

impl AssistantStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AssistantStatus::Closed | AssistantStatus::Errored)
    }
}

// ---------------------------------------------------------------------------
// Input level
// ---------------------------------------------------------------------------

/// Emitted once per captured frame, for a microphone level meter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputLevelEvent {
    /// Capture frame sequence number.
    pub seq: u64,
    /// Root-mean-square level of the frame in [0.0, 1.0].
    pub rms: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_camel_case_and_lowercase_status() {
        let event = AssistantStatusEvent {
            seq: 4,
            status: AssistantStatus::Errored,
            detail: Some("microphone unavailable: denied".into()),
            error_kind: Some(ErrorKind::Permission),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["status"], "errored");
        assert_eq!(json["detail"], "microphone unavailable: denied");
        assert_eq!(json["errorKind"], "permission");

        let round_trip: AssistantStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip, event);
    }

    #[test]
    fn error_kind_is_omitted_when_absent() {
        let event = AssistantStatusEvent {
            seq: 0,
            status: AssistantStatus::Speaking,
            detail: None,
            error_kind: None,
        };
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "speaking");
        assert!(json.get("errorKind").is_none());
    }

    #[test]
    fn status_rejects_non_lowercase_values() {
        let err = serde_json::from_str::<AssistantStatus>(r#""Listening""#);
        assert!(err.is_err(), "expected invalid casing to fail");
    }

    #[test]
    fn input_level_event_serializes_with_camel_case_fields() {
        let event = InputLevelEvent { seq: 3, rms: 0.18 };
        let json = serde_json::to_value(&event).expect("serialize level event");
        assert_eq!(json["seq"], 3);
        let rms = json["rms"].as_f64().expect("rms should serialize as number");
        assert!((rms - 0.18).abs() < 1e-5);
    }
}
