//! Body-motion synthesis.
//!
//! A [`MotionClient`] asks the configured motion service for a clip and, when
//! that is unavailable, generates one locally from the style library.

pub mod generator;
pub mod style;

use crate::{
    config::MotionProviderConfig,
    error::{CapabilityError, CapabilityResult},
    fallback::FallbackCounter,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tracing::warn;
use uuid::Uuid;

pub use generator::generate_prompt_motion;

pub const MAX_FPS: u32 = 120;
pub const MIN_DURATION_SEC: f64 = 0.1;
/// Upper bound on clip length; frame count grows with `duration_sec * fps`.
pub const MAX_DURATION_SEC: f64 = 30.0;
const OUTPUT_FORMAT: &str = "json";

/// One bone rotation sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionKeyframe {
    pub t: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

/// One sample of the root trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RootPosition {
    pub t: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

pub type MotionTracks = BTreeMap<String, Vec<MotionKeyframe>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MotionRequest {
    pub prompt: String,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub duration_sec: Option<f64>,
    #[serde(default)]
    pub fps: Option<u32>,
}

impl MotionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

/// A request with every optional parameter filled in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedMotionRequest {
    pub prompt: String,
    pub seed: u64,
    pub duration_sec: f64,
    pub fps: u32,
    pub format: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionClip {
    pub job_id: String,
    pub format: String,
    pub duration_sec: f64,
    pub fps: u32,
    pub tracks: MotionTracks,
    #[serde(rename = "rootPosition", alias = "root_position", default)]
    pub root_position: Vec<RootPosition>,
    #[serde(default)]
    pub fallback_used: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[async_trait]
pub trait MotionBackend: Send + Sync {
    async fn generate(&self, request: &ResolvedMotionRequest) -> CapabilityResult<MotionClip>;
}

/// Loose shape of a motion service reply.
#[derive(Deserialize)]
struct ProviderReply {
    job_id: Option<String>,
    format: Option<String>,
    #[serde(alias = "duration")]
    duration_sec: Option<f64>,
    #[serde(alias = "frame_rate")]
    fps: Option<u32>,
    #[serde(default)]
    tracks: MotionTracks,
    #[serde(alias = "rootPosition", default)]
    root_position: Option<Vec<RootPosition>>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

pub struct HttpMotionProvider {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpMotionProvider {
    pub fn new(client: reqwest::Client, endpoint: String, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl MotionBackend for HttpMotionProvider {
    async fn generate(&self, request: &ResolvedMotionRequest) -> CapabilityResult<MotionClip> {
        let reply: ProviderReply = self
            .client
            .post(&self.endpoint)
            .json(request)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if reply.tracks.is_empty() {
            return Err(CapabilityError::InvalidResponse(
                "motion reply has no tracks".to_string(),
            ));
        }
        Ok(MotionClip {
            job_id: reply.job_id.unwrap_or_else(new_job_id),
            format: reply.format.unwrap_or_else(|| request.format.to_string()),
            duration_sec: reply.duration_sec.unwrap_or(request.duration_sec),
            fps: reply.fps.unwrap_or(request.fps),
            tracks: reply.tracks,
            root_position: reply.root_position.unwrap_or_default(),
            fallback_used: false,
            metadata: reply.metadata.unwrap_or_default(),
        })
    }
}

fn new_job_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Clone)]
pub struct MotionClient {
    backend: Option<Arc<dyn MotionBackend>>,
    fps: u32,
    duration_sec: f64,
    fallbacks: FallbackCounter,
}

impl MotionClient {
    pub fn new(
        backend: Option<Arc<dyn MotionBackend>>,
        config: &MotionProviderConfig,
        fallbacks: FallbackCounter,
    ) -> Self {
        Self {
            backend,
            fps: config.fps,
            duration_sec: config.duration_sec,
            fallbacks,
        }
    }

    pub fn fallbacks(&self) -> &FallbackCounter {
        &self.fallbacks
    }

    pub fn resolve(&self, request: MotionRequest) -> ResolvedMotionRequest {
        ResolvedMotionRequest {
            prompt: request.prompt,
            seed: request.seed.unwrap_or_else(rand::random),
            duration_sec: request
                .duration_sec
                .filter(|d| d.is_finite())
                .unwrap_or(self.duration_sec)
                .clamp(MIN_DURATION_SEC, MAX_DURATION_SEC),
            fps: request.fps.unwrap_or(self.fps).clamp(1, MAX_FPS),
            format: OUTPUT_FORMAT,
        }
    }

    /// Produces a clip for `request`. Never fails; the seed used is always
    /// present in the clip metadata.
    pub async fn generate(&self, request: MotionRequest) -> MotionClip {
        let resolved = self.resolve(request);
        let failure = match &self.backend {
            None => CapabilityError::NotConfigured,
            Some(backend) => match backend.generate(&resolved).await {
                Ok(mut clip) => {
                    clip.metadata
                        .entry("seed")
                        .or_insert_with(|| json!(resolved.seed));
                    return clip;
                }
                Err(e) => e,
            },
        };
        self.fallbacks.record(&failure);

        let job = resolved.clone();
        match tokio::task::spawn_blocking(move || fallback_clip(&job)).await {
            Ok(clip) => clip,
            Err(e) => {
                warn!(error = %e, "Motion fallback task failed");
                MotionClip {
                    job_id: new_job_id(),
                    format: OUTPUT_FORMAT.to_string(),
                    duration_sec: resolved.duration_sec,
                    fps: resolved.fps,
                    tracks: MotionTracks::new(),
                    root_position: Vec::new(),
                    fallback_used: true,
                    metadata: Map::new(),
                }
            }
        }
    }
}

/// Generates a clip locally. Deterministic apart from the job id.
pub fn fallback_clip(request: &ResolvedMotionRequest) -> MotionClip {
    let generated = generate_prompt_motion(
        &request.prompt,
        request.duration_sec,
        request.fps,
        request.seed,
    );
    MotionClip {
        job_id: new_job_id(),
        format: request.format.to_string(),
        duration_sec: request.duration_sec,
        fps: request.fps,
        tracks: generated.tracks,
        root_position: generated.root_position,
        fallback_used: true,
        metadata: generated.metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::Capability;

    struct Failing;

    #[async_trait]
    impl MotionBackend for Failing {
        async fn generate(&self, _request: &ResolvedMotionRequest) -> CapabilityResult<MotionClip> {
            Err(CapabilityError::Timeout)
        }
    }

    struct Echo;

    #[async_trait]
    impl MotionBackend for Echo {
        async fn generate(&self, request: &ResolvedMotionRequest) -> CapabilityResult<MotionClip> {
            let mut clip = fallback_clip(request);
            clip.fallback_used = false;
            clip.metadata = Map::new();
            Ok(clip)
        }
    }

    fn client(backend: Option<Arc<dyn MotionBackend>>) -> MotionClient {
        MotionClient::new(
            backend,
            &MotionProviderConfig::default(),
            FallbackCounter::new(Capability::Motion),
        )
    }

    #[tokio::test]
    async fn test_failure_uses_seeded_fallback() {
        let client = client(Some(Arc::new(Failing)));
        let request = MotionRequest {
            prompt: "a bow".into(),
            seed: Some(3),
            duration_sec: Some(1.0),
            fps: Some(10),
        };
        let a = client.generate(request.clone()).await;
        let b = client.generate(request).await;
        assert!(a.fallback_used);
        assert_eq!(a.tracks, b.tracks);
        assert_eq!(a.root_position, b.root_position);
        assert_eq!(a.metadata["style"], "bow");
        assert_eq!(client.fallbacks().get(), 2);
    }

    #[tokio::test]
    async fn test_primary_clip_gets_seed() {
        let client = client(Some(Arc::new(Echo)));
        let clip = client
            .generate(MotionRequest {
                seed: Some(11),
                ..MotionRequest::new("swim")
            })
            .await;
        assert!(!clip.fallback_used);
        assert_eq!(clip.metadata["seed"], 11);
        assert_eq!(client.fallbacks().get(), 0);
    }

    #[test]
    fn test_resolve_applies_defaults_and_bounds() {
        let client = client(None);
        let resolved = client.resolve(MotionRequest {
            fps: Some(1000),
            duration_sec: Some(0.0),
            ..MotionRequest::new("x")
        });
        assert_eq!(resolved.fps, MAX_FPS);
        assert_eq!(resolved.duration_sec, MIN_DURATION_SEC);
        let defaults = client.resolve(MotionRequest::new("x"));
        assert_eq!(defaults.fps, 24);
        assert_eq!(defaults.duration_sec, 3.0);
    }

    #[test]
    fn test_resolve_caps_long_and_non_finite_durations() {
        let client = client(None);
        let long = client.resolve(MotionRequest {
            duration_sec: Some(1.0e12),
            fps: Some(u32::MAX),
            ..MotionRequest::new("x")
        });
        assert_eq!(long.duration_sec, MAX_DURATION_SEC);
        assert_eq!(long.fps, MAX_FPS);
        for bad in [f64::NAN, f64::INFINITY] {
            let resolved = client.resolve(MotionRequest {
                duration_sec: Some(bad),
                ..MotionRequest::new("x")
            });
            assert_eq!(resolved.duration_sec, 3.0);
        }
    }

    #[test]
    fn test_clip_serializes_root_position_in_camel_case() {
        let clip = fallback_clip(&ResolvedMotionRequest {
            prompt: "hop".into(),
            seed: 1,
            duration_sec: 0.1,
            fps: 10,
            format: OUTPUT_FORMAT,
        });
        let value = serde_json::to_value(&clip).unwrap_or_default();
        assert!(value.get("rootPosition").is_some());
        assert_eq!(value["fallback_used"], true);
    }
}
