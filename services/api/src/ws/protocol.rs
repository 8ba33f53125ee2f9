//! Defines the WebSocket message protocol between the avatar client and the API server.

use avatar_core::motion::MotionClip;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Close code sent when the client was silent for longer than the idle timeout.
pub const CLOSE_IDLE_TIMEOUT: u16 = 4408;
/// Close code sent when the session failed internally.
pub const CLOSE_INTERNAL_ERROR: u16 = 4500;

/// Control messages sent from the client. Audio arrives as binary frames.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    /// Ends the current utterance now.
    Flush,
    Resume,
}

/// Wall-clock bounds of one pipeline step. All zero when the step did not run.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepTiming {
    /// Unix epoch milliseconds.
    pub started_at: i64,
    pub ended_at: i64,
    pub latency_ms: i64,
}

impl StepTiming {
    pub fn skipped() -> Self {
        Self::default()
    }
}

/// Measures a [`StepTiming`].
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started_at: i64,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn finish(self) -> StepTiming {
        let ended_at = Utc::now().timestamp_millis().max(self.started_at);
        StepTiming {
            started_at: self.started_at,
            ended_at,
            latency_ms: ended_at - self.started_at,
        }
    }
}

/// Messages sent from the server to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message of every session.
    Ready { correlation_id: String },
    Pong,
    /// Acknowledges a control message.
    Ack { ack: &'static str },
    PartialTranscript {
        turn_id: String,
        text: String,
    },
    FinalTranscript {
        turn_id: String,
        text: String,
        fallback_used: bool,
        timing: StepTiming,
    },
    LlmToken {
        turn_id: String,
        token: String,
    },
    LlmDone {
        turn_id: String,
        assistant_text: String,
        fallback_used: bool,
        truncated: bool,
        context_count: usize,
        retrieval: StepTiming,
        generation: StepTiming,
    },
    /// Binary audio frames follow until `tts_end`.
    TtsStart {
        turn_id: String,
        sample_rate: u32,
        channels: u16,
    },
    TtsEnd {
        turn_id: String,
        chunks: usize,
        truncated: bool,
        fallback_used: bool,
        timing: StepTiming,
    },
    AvatarEvent {
        turn_id: String,
        mouth_open: f32,
    },
    AssistantMotion {
        turn_id: String,
        fallback_used: bool,
        motion: MotionClip,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        turn_id: Option<String>,
        message: String,
        recoverable: bool,
    },
}

impl ServerMessage {
    pub fn error(turn_id: Option<&str>, message: impl Into<String>, recoverable: bool) -> Self {
        ServerMessage::Error {
            turn_id: turn_id.map(str::to_string),
            message: message.into(),
            recoverable,
        }
    }
}

/// A server message stamped with the session it belongs to.
#[derive(Serialize)]
pub struct Envelope<'a> {
    pub session_id: &'a str,
    #[serde(flatten)]
    pub message: &'a ServerMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(message: &ServerMessage) -> serde_json::Value {
        serde_json::to_value(Envelope {
            session_id: "s1",
            message,
        })
        .expect("serialize")
    }

    #[test]
    fn test_client_messages_parse() {
        let parsed: ClientMessage = serde_json::from_str(r#"{"type":"flush"}"#).unwrap();
        assert_eq!(parsed, ClientMessage::Flush);
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"kind":"ping"}"#).is_err());
    }

    #[test]
    fn test_every_event_carries_session_id() {
        assert_eq!(
            encode(&ServerMessage::Pong),
            json!({"type": "pong", "session_id": "s1"})
        );
        assert_eq!(
            encode(&ServerMessage::LlmToken {
                turn_id: "t1".into(),
                token: "Hi".into()
            }),
            json!({"type": "llm_token", "session_id": "s1", "turn_id": "t1", "token": "Hi"})
        );
    }

    #[test]
    fn test_error_omits_missing_turn() {
        let value = encode(&ServerMessage::error(None, "bad message", true));
        assert_eq!(
            value,
            json!({"type": "error", "session_id": "s1", "message": "bad message", "recoverable": true})
        );
        let value = encode(&ServerMessage::error(Some("t9"), "failed", false));
        assert_eq!(value["turn_id"], "t9");
    }

    #[test]
    fn test_timing() {
        assert_eq!(
            serde_json::to_value(StepTiming::skipped()).unwrap(),
            json!({"started_at": 0, "ended_at": 0, "latency_ms": 0})
        );
        let timing = Stopwatch::start().finish();
        assert!(timing.started_at > 0);
        assert_eq!(timing.latency_ms, timing.ended_at - timing.started_at);
    }
}
