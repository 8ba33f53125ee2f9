//! API Models
//!
//! This module defines the request and response bodies of the REST surface,
//! annotated for OpenAPI documentation with `utoipa`.

use avatar_core::{
    fallback::FallbackSummary,
    motion::{MotionClip, RootPosition},
    registry::{ProviderStatus, ProviderSummary},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub version: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ProviderStatusDto {
    /// False when only the offline substitute is available.
    pub configured: bool,
    pub endpoint: Option<String>,
    pub model: Option<String>,
}

impl From<ProviderStatus> for ProviderStatusDto {
    fn from(status: ProviderStatus) -> Self {
        Self {
            configured: status.configured,
            endpoint: status.endpoint,
            model: status.model,
        }
    }
}

/// Fallback substitutions since process start, per capability.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackTotalsDto {
    pub transcription: u64,
    pub generation: u64,
    pub speech: u64,
    pub motion: u64,
    pub embedding: u64,
}

impl From<FallbackSummary> for FallbackTotalsDto {
    fn from(summary: FallbackSummary) -> Self {
        Self {
            transcription: summary.transcription,
            generation: summary.generation,
            speech: summary.speech,
            motion: summary.motion,
            embedding: summary.embedding,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ProvidersResponse {
    pub transcription: ProviderStatusDto,
    pub generation: ProviderStatusDto,
    pub speech: ProviderStatusDto,
    pub motion: ProviderStatusDto,
    pub embedding: ProviderStatusDto,
    pub fallbacks: FallbackTotalsDto,
    /// Number of chunks in the loaded retrieval index.
    pub context_chunks: usize,
}

impl ProvidersResponse {
    pub fn new(summary: ProviderSummary, fallbacks: FallbackSummary, context_chunks: usize) -> Self {
        Self {
            transcription: summary.transcription.into(),
            generation: summary.generation.into(),
            speech: summary.speech.into(),
            motion: summary.motion.into(),
            embedding: summary.embedding.into(),
            fallbacks: fallbacks.into(),
            context_chunks,
        }
    }
}

#[derive(Deserialize, ToSchema, Debug, Clone)]
pub struct MotionGeneratePayload {
    #[schema(example = "wave hello excitedly")]
    pub prompt: String,
    pub seed: Option<u64>,
    #[schema(example = 3.0)]
    pub duration_sec: Option<f64>,
    #[schema(example = 24)]
    pub fps: Option<u32>,
}

#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct MotionGenerateResponse {
    pub job_id: String,
    pub format: String,
    pub duration_sec: f64,
    pub fps: u32,
    /// Bone name to quaternion keyframes `{t, x, y, z, w}`.
    #[schema(value_type = Object)]
    pub tracks: Value,
    #[serde(rename = "rootPosition")]
    #[schema(value_type = Vec<Object>)]
    pub root_position: Vec<RootPosition>,
    pub fallback_used: bool,
    #[schema(value_type = Object)]
    pub metadata: Map<String, Value>,
}

impl From<MotionClip> for MotionGenerateResponse {
    fn from(clip: MotionClip) -> Self {
        Self {
            job_id: clip.job_id,
            format: clip.format,
            duration_sec: clip.duration_sec,
            fps: clip.fps,
            tracks: serde_json::to_value(&clip.tracks).unwrap_or(Value::Null),
            root_position: clip.root_position,
            fallback_used: clip.fallback_used,
            metadata: clip.metadata,
        }
    }
}

/// A typed chat message answered over server-sent events.
#[derive(Deserialize, ToSchema, Debug, Clone)]
pub struct TextChatPayload {
    pub session_id: String,
    #[schema(example = "What does the avatar know about tides?")]
    pub user_text: String,
    /// Generated when absent.
    pub turn_id: Option<String>,
    /// Overrides the configured retrieval depth.
    pub top_k: Option<usize>,
}

/// Data of the `context` event.
#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct TextChatContext {
    pub session_id: String,
    pub turn_id: String,
    pub document_count: usize,
}

/// Data of each `token` event.
#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct TextChatToken {
    pub session_id: String,
    pub turn_id: String,
    pub token: String,
}

#[derive(Serialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChatLatency {
    pub rag: i64,
    pub llm: i64,
}

/// Data of the closing `done` event.
#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct TextChatDone {
    pub session_id: String,
    pub turn_id: String,
    pub assistant_text: String,
    pub used_context: bool,
    pub truncated: bool,
    pub fallback_used: bool,
    pub latency_ms: TextChatLatency,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use avatar_core::motion::{MotionKeyframe, MotionTracks};

    #[test]
    fn test_motion_payload_optional_fields() {
        let payload: MotionGeneratePayload =
            serde_json::from_str(r#"{"prompt": "dance"}"#).unwrap();
        assert_eq!(payload.prompt, "dance");
        assert!(payload.seed.is_none());
        assert!(payload.fps.is_none());

        let result: Result<MotionGeneratePayload, _> = serde_json::from_str("{}");
        assert!(result.is_err());
    }

    #[test]
    fn test_motion_response_uses_root_position_key() {
        let mut tracks = MotionTracks::new();
        tracks.insert(
            "hips".to_string(),
            vec![MotionKeyframe {
                t: 0.0,
                x: 0.0,
                y: 0.0,
                z: 0.0,
                w: 1.0,
            }],
        );
        let clip = MotionClip {
            job_id: "job".to_string(),
            format: "json".to_string(),
            duration_sec: 1.0,
            fps: 24,
            tracks,
            root_position: vec![RootPosition {
                t: 0.0,
                x: 0.0,
                y: 0.0,
                z: 0.0,
            }],
            fallback_used: true,
            metadata: Map::new(),
        };
        let json = serde_json::to_value(MotionGenerateResponse::from(clip)).unwrap();
        assert_eq!(json["tracks"]["hips"][0]["w"], 1.0);
        assert_eq!(json["rootPosition"].as_array().map(Vec::len), Some(1));
        assert!(json.get("root_position").is_none());
    }

    #[test]
    fn test_providers_response_shape() {
        let status = |configured| ProviderStatus {
            configured,
            endpoint: None,
            model: None,
        };
        let summary = ProviderSummary {
            transcription: status(true),
            generation: status(false),
            speech: status(false),
            motion: status(false),
            embedding: status(false),
        };
        let fallbacks = FallbackSummary {
            speech: 2,
            ..FallbackSummary::default()
        };
        let response = ProvidersResponse::new(summary, fallbacks, 7);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["transcription"]["configured"], true);
        assert_eq!(json["fallbacks"]["speech"], 2);
        assert_eq!(json["context_chunks"], 7);
    }

    #[test]
    fn test_text_chat_payload_optional_fields() {
        let payload: TextChatPayload =
            serde_json::from_str(r#"{"session_id": "s1", "user_text": "hi"}"#).unwrap();
        assert_eq!(payload.user_text, "hi");
        assert!(payload.turn_id.is_none());
        assert!(payload.top_k.is_none());

        let result: Result<TextChatPayload, _> = serde_json::from_str(r#"{"session_id": "s1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            message: "prompt must not be empty".to_string(),
        };
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(json, r#"{"message":"prompt must not be empty"}"#);
    }
}
