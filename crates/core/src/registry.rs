//! Provider registry.
//!
//! Built once at startup. Holds the primary provider transports, which are
//! shared read-only by every session, and the process-wide fallback totals.
//! Each session asks for its own [`CapabilityClients`] so that fallback
//! deltas it observes are never polluted by concurrent sessions.

use crate::{
    config::ProvidersConfig,
    embedding::{EmbeddingBackend, EmbeddingClient, OpenAIEmbeddings},
    fallback::{Capability, FallbackCounter, FallbackSummary, FallbackTotals},
    llm_client::{GenerationClient, LLMClient, OpenAICompatibleClient},
    motion::{HttpMotionProvider, MotionBackend, MotionClient},
    speech::{HttpSpeechSynthesizer, SpeechClient, TextToSpeech},
    transcription::{SpeechToText, TranscriptionClient, transcriber_for},
};
use async_openai::config::OpenAIConfig;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// One client per capability, with counters local to their owner.
#[derive(Clone)]
pub struct CapabilityClients {
    pub transcription: TranscriptionClient,
    pub generation: GenerationClient,
    pub speech: SpeechClient,
    pub motion: MotionClient,
    pub embedding: EmbeddingClient,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatus {
    /// False when only the offline substitute is available.
    pub configured: bool,
    pub endpoint: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSummary {
    pub transcription: ProviderStatus,
    pub generation: ProviderStatus,
    pub speech: ProviderStatus,
    pub motion: ProviderStatus,
    pub embedding: ProviderStatus,
}

#[derive(Clone)]
pub struct ProviderRegistry {
    config: ProvidersConfig,
    transcriber: Option<Arc<dyn SpeechToText>>,
    llm: Option<Arc<dyn LLMClient>>,
    speech: Option<Arc<dyn TextToSpeech>>,
    motion: Option<Arc<dyn MotionBackend>>,
    embeddings: Option<Arc<dyn EmbeddingBackend>>,
    totals: Arc<FallbackTotals>,
}

fn openai_config(api_base: &str, api_key: Option<&str>) -> OpenAIConfig {
    OpenAIConfig::new()
        .with_api_base(api_base.trim_end_matches('/'))
        .with_api_key(api_key.unwrap_or_default())
}

impl ProviderRegistry {
    /// Connects every capability that has an endpoint configured.
    pub fn from_config(config: ProvidersConfig) -> Self {
        let http = reqwest::Client::new();

        let transcriber = transcriber_for(&config.stt, http.clone());
        let llm = config.llm.api_base.as_deref().map(|base| {
            Arc::new(OpenAICompatibleClient::new(
                openai_config(base, config.llm.api_key.as_deref()),
                &config.llm,
            )) as Arc<dyn LLMClient>
        });
        let speech = config.tts.endpoint.clone().map(|endpoint| {
            Arc::new(HttpSpeechSynthesizer::new(http.clone(), endpoint, &config.tts))
                as Arc<dyn TextToSpeech>
        });
        let motion = config.motion.endpoint.clone().map(|endpoint| {
            Arc::new(HttpMotionProvider::new(
                http.clone(),
                endpoint,
                config.motion.timeout,
            )) as Arc<dyn MotionBackend>
        });
        let embeddings = config.embedding.api_base.as_deref().map(|base| {
            Arc::new(OpenAIEmbeddings::new(
                openai_config(base, config.embedding.api_key.as_deref()),
                config.embedding.model.clone(),
            )) as Arc<dyn EmbeddingBackend>
        });

        let registry = Self {
            config,
            transcriber,
            llm,
            speech,
            motion,
            embeddings,
            totals: Arc::new(FallbackTotals::default()),
        };
        let summary = registry.summary();
        info!(
            transcription = summary.transcription.configured,
            generation = summary.generation.configured,
            speech = summary.speech.configured,
            motion = summary.motion.configured,
            embedding = summary.embedding.configured,
            "Provider registry initialized"
        );
        registry
    }

    /// A registry with no primary providers; every call uses its substitute.
    pub fn offline(config: ProvidersConfig) -> Self {
        Self {
            config,
            transcriber: None,
            llm: None,
            speech: None,
            motion: None,
            embeddings: None,
            totals: Arc::new(FallbackTotals::default()),
        }
    }

    pub fn with_transcriber(mut self, backend: Arc<dyn SpeechToText>) -> Self {
        self.transcriber = Some(backend);
        self
    }

    pub fn with_llm(mut self, backend: Arc<dyn LLMClient>) -> Self {
        self.llm = Some(backend);
        self
    }

    pub fn with_speech(mut self, backend: Arc<dyn TextToSpeech>) -> Self {
        self.speech = Some(backend);
        self
    }

    pub fn with_motion(mut self, backend: Arc<dyn MotionBackend>) -> Self {
        self.motion = Some(backend);
        self
    }

    pub fn with_embeddings(mut self, backend: Arc<dyn EmbeddingBackend>) -> Self {
        self.embeddings = Some(backend);
        self
    }

    pub fn config(&self) -> &ProvidersConfig {
        &self.config
    }

    /// Fresh clients over the shared transports. Their counters start at
    /// zero and also feed the process-wide totals.
    pub fn session_clients(&self) -> CapabilityClients {
        let counter = |capability| FallbackCounter::with_totals(capability, self.totals.clone());
        CapabilityClients {
            transcription: TranscriptionClient::new(
                self.transcriber.clone(),
                &self.config.stt,
                counter(Capability::Transcription),
            ),
            generation: GenerationClient::new(self.llm.clone(), counter(Capability::Generation)),
            speech: SpeechClient::new(
                self.speech.clone(),
                &self.config.tts,
                counter(Capability::Speech),
            ),
            motion: MotionClient::new(
                self.motion.clone(),
                &self.config.motion,
                counter(Capability::Motion),
            ),
            embedding: EmbeddingClient::new(
                self.embeddings.clone(),
                counter(Capability::Embedding),
            ),
        }
    }

    pub fn fallback_totals(&self) -> FallbackSummary {
        self.totals.summary()
    }

    pub fn summary(&self) -> ProviderSummary {
        let config = &self.config;
        ProviderSummary {
            transcription: ProviderStatus {
                configured: self.transcriber.is_some(),
                endpoint: config.stt.endpoint.clone(),
                model: None,
            },
            generation: ProviderStatus {
                configured: self.llm.is_some(),
                endpoint: config.llm.api_base.clone(),
                model: Some(config.llm.model.clone()),
            },
            speech: ProviderStatus {
                configured: self.speech.is_some(),
                endpoint: config.tts.endpoint.clone(),
                model: Some(config.tts.default_voice.clone()),
            },
            motion: ProviderStatus {
                configured: self.motion.is_some(),
                endpoint: config.motion.endpoint.clone(),
                model: None,
            },
            embedding: ProviderStatus {
                configured: self.embeddings.is_some(),
                endpoint: config.embedding.api_base.clone(),
                model: Some(config.embedding.model.clone()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generic_types::TranscriptionAudio;

    #[tokio::test]
    async fn test_session_counters_are_isolated_but_totals_are_shared() {
        let registry = ProviderRegistry::offline(ProvidersConfig::default());
        let first = registry.session_clients();
        let second = registry.session_clients();

        let probe = second.transcription.fallbacks().probe();
        let _ = first
            .transcription
            .transcribe(TranscriptionAudio::Pcm(vec![0; 3200]))
            .await;
        let _ = first.embedding.embed_one("x").await;

        assert!(!probe.used());
        assert_eq!(first.transcription.fallbacks().get(), 1);
        assert_eq!(second.transcription.fallbacks().get(), 0);
        let totals = registry.fallback_totals();
        assert_eq!(totals.transcription, 1);
        assert_eq!(totals.embedding, 1);
        assert_eq!(totals.generation, 0);
    }

    #[test]
    fn test_unconfigured_registry_summary() {
        let registry = ProviderRegistry::from_config(ProvidersConfig::default());
        let summary = registry.summary();
        assert!(!summary.transcription.configured);
        assert!(!summary.generation.configured);
        assert_eq!(summary.generation.model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn test_endpoints_enable_providers() {
        let mut config = ProvidersConfig::default();
        config.stt.endpoint = Some("ws://localhost:9000/stt".into());
        config.llm.api_base = Some("http://localhost:11434/v1".into());
        config.motion.endpoint = Some("http://localhost:9100/generate".into());
        let summary = ProviderRegistry::from_config(config).summary();
        assert!(summary.transcription.configured);
        assert!(summary.generation.configured);
        assert!(summary.motion.configured);
        assert!(!summary.speech.configured);
    }
}
