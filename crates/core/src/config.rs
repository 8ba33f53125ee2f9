//! Provider configuration.
//!
//! These structs describe where each capability's primary provider lives. A
//! missing endpoint is not an error: the capability then runs on its offline
//! fallback alone.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct LlmProviderConfig {
    /// Base URL of an OpenAI-compatible API, e.g. `https://api.openai.com/v1`.
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 256,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SttProviderConfig {
    /// `http(s)://` for a POST endpoint, `ws(s)://` for a one-shot websocket.
    pub endpoint: Option<String>,
    pub language: Option<String>,
    pub sample_rate: u32,
    pub enable_partial: bool,
    /// When false, a failed primary call is reported instead of substituted.
    pub allow_fallback: bool,
    pub timeout: Duration,
}

impl Default for SttProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            language: None,
            sample_rate: 16_000,
            enable_partial: true,
            allow_fallback: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TtsProviderConfig {
    pub endpoint: Option<String>,
    pub default_voice: String,
    pub language: Option<String>,
    pub sample_rate: u32,
    pub chunk_ms: u32,
    pub timeout: Duration,
}

impl Default for TtsProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            default_voice: "default".to_string(),
            language: None,
            sample_rate: 16_000,
            chunk_ms: 20,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MotionProviderConfig {
    pub endpoint: Option<String>,
    pub fps: u32,
    pub duration_sec: f64,
    pub timeout: Duration,
}

impl Default for MotionProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            fps: 24,
            duration_sec: 3.0,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EmbeddingConfig {
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            api_key: None,
            model: "text-embedding-3-small".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RagConfig {
    pub index_path: PathBuf,
    pub top_k: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("./data/index.json"),
            top_k: 3,
        }
    }
}

/// Configuration for every capability, assembled once at startup.
#[derive(Clone, Debug, Default)]
pub struct ProvidersConfig {
    pub llm: LlmProviderConfig,
    pub stt: SttProviderConfig,
    pub tts: TtsProviderConfig,
    pub motion: MotionProviderConfig,
    pub embedding: EmbeddingConfig,
    pub rag: RagConfig,
}
