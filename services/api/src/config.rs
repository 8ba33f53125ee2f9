use avatar_core::config::{
    EmbeddingConfig, LlmProviderConfig, MotionProviderConfig, ProvidersConfig, RagConfig,
    SttProviderConfig, TtsProviderConfig,
};
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// How fragments are classified as speech or silence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VadMode {
    /// RMS energy against a fixed threshold.
    Energy,
    /// No detector; turns end on `flush` or the silence timer only.
    Off,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VadSettings {
    pub mode: VadMode,
    pub frame_ms: u32,
    pub silence_ms: u32,
    pub energy_threshold: f32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            mode: VadMode::Energy,
            frame_ms: 20,
            silence_ms: 600,
            energy_threshold: 500.0,
        }
    }
}

/// Per-connection behaviour of the websocket session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub max_buffer_fragments: usize,
    pub silence_timeout: Duration,
    pub target_sample_rate: u32,
    pub vad: VadSettings,
    pub max_reply_chars: usize,
    pub max_tts_chunks: usize,
    pub mouth_interval: Duration,
    pub rag_top_k: usize,
    pub tts_voice: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            max_buffer_fragments: 150,
            silence_timeout: Duration::from_millis(1500),
            target_sample_rate: 16_000,
            vad: VadSettings::default(),
            max_reply_chars: 150,
            max_tts_chunks: 50,
            mouth_interval: Duration::from_millis(200),
            rag_top_k: 3,
            tts_voice: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderKind {
    Ffmpeg,
    None,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecoderSettings {
    pub kind: DecoderKind,
    pub ffmpeg_path: String,
    pub workers: usize,
    pub timeout: Duration,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            kind: DecoderKind::Ffmpeg,
            ffmpeg_path: "ffmpeg".to_string(),
            workers: 4,
            timeout: Duration::from_millis(5000),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub prompts_path: PathBuf,
    pub session: SessionSettings,
    pub decoder: DecoderSettings,
    pub providers: ProvidersConfig,
}

fn var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    match var(key).map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(
                key.to_string(),
                format!("'{}' is not a boolean", v),
            )),
        },
    }
}

fn parse_positive<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default + Copy,
    T::Err: Display,
{
    let value = parse_var(key, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./prompts"));

        let vad_mode = match var("VAD_MODE").map(|v| v.to_lowercase()).as_deref() {
            None | Some("energy") => VadMode::Energy,
            Some("off") | Some("none") => VadMode::Off,
            Some(other) => {
                return Err(ConfigError::InvalidValue(
                    "VAD_MODE".to_string(),
                    format!("'{}' is not one of energy, off", other),
                ));
            }
        };
        let vad = VadSettings {
            mode: vad_mode,
            frame_ms: parse_positive("VAD_FRAME_MS", 20)?,
            silence_ms: parse_positive("VAD_SILENCE_MS", 600)?,
            energy_threshold: parse_var("VAD_ENERGY_THRESHOLD", 500.0)?,
        };

        let target_sample_rate: u32 = parse_positive("TARGET_SAMPLE_RATE", 16_000)?;
        let provider_timeout = Duration::from_secs(parse_positive("PROVIDER_TIMEOUT_SEC", 30)?);

        let session = SessionSettings {
            idle_timeout: Duration::from_secs(parse_positive("IDLE_TIMEOUT_SEC", 60)?),
            max_buffer_fragments: parse_positive("MAX_BUFFER_FRAGMENTS", 150)?,
            silence_timeout: Duration::from_millis(parse_positive("SILENCE_TIMEOUT_MS", 1500)?),
            target_sample_rate,
            vad,
            max_reply_chars: parse_positive("MAX_REPLY_CHARS", 150)?,
            max_tts_chunks: parse_positive("MAX_TTS_CHUNKS", 50)?,
            mouth_interval: Duration::from_millis(parse_var("MOUTH_INTERVAL_MS", 200)?),
            rag_top_k: parse_var("RAG_TOP_K", 3)?,
            tts_voice: var("TTS_VOICE"),
        };

        let decoder_kind = match var("DECODER").map(|v| v.to_lowercase()).as_deref() {
            None | Some("ffmpeg") => DecoderKind::Ffmpeg,
            Some("none") | Some("off") => DecoderKind::None,
            Some(other) => {
                return Err(ConfigError::InvalidValue(
                    "DECODER".to_string(),
                    format!("'{}' is not one of ffmpeg, none", other),
                ));
            }
        };
        let decoder = DecoderSettings {
            kind: decoder_kind,
            ffmpeg_path: var("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()),
            workers: parse_positive("DECODE_WORKERS", 4)?,
            timeout: Duration::from_millis(parse_positive("DECODE_TIMEOUT_MS", 5000)?),
        };

        let llm_api_key = var("LLM_API_KEY");
        let providers = ProvidersConfig {
            llm: LlmProviderConfig {
                api_base: var("LLM_API_BASE"),
                api_key: llm_api_key.clone(),
                model: var("CHAT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
                temperature: parse_var("LLM_TEMPERATURE", 0.7)?,
                max_tokens: parse_positive("LLM_MAX_TOKENS", 256)?,
            },
            stt: SttProviderConfig {
                endpoint: var("STT_ENDPOINT"),
                language: var("STT_LANGUAGE"),
                sample_rate: target_sample_rate,
                enable_partial: parse_bool("STT_ENABLE_PARTIAL", true)?,
                allow_fallback: parse_bool("STT_FALLBACK", true)?,
                timeout: provider_timeout,
            },
            tts: TtsProviderConfig {
                endpoint: var("TTS_ENDPOINT"),
                default_voice: var("TTS_VOICE").unwrap_or_else(|| "default".to_string()),
                language: var("TTS_LANGUAGE"),
                sample_rate: parse_positive("TTS_SAMPLE_RATE", 16_000)?,
                chunk_ms: parse_positive("TTS_CHUNK_MS", 20)?,
                timeout: provider_timeout,
            },
            motion: MotionProviderConfig {
                endpoint: var("MOTION_ENDPOINT"),
                fps: parse_positive("MOTION_FPS", 24)?,
                duration_sec: parse_positive("MOTION_DURATION_SEC", 3.0)?,
                timeout: provider_timeout,
            },
            embedding: EmbeddingConfig {
                api_base: var("EMBEDDING_API_BASE"),
                api_key: var("EMBEDDING_API_KEY").or(llm_api_key),
                model: var("EMBEDDING_MODEL")
                    .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            },
            rag: RagConfig {
                index_path: var("RAG_INDEX_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/index.json")),
                top_k: session.rag_top_k,
            },
        };

        Ok(Self {
            bind_address,
            log_level,
            prompts_path,
            session,
            decoder,
            providers,
        })
    }
}
