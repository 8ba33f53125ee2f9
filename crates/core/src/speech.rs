//! Text-to-speech capability.

use crate::{
    config::TtsProviderConfig,
    error::{CapabilityError, CapabilityResult},
    fallback::FallbackCounter,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::{pin::Pin, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Audio chunks from a primary speech provider.
pub type SpeechStream = Pin<Box<dyn Stream<Item = CapabilityResult<Bytes>> + Send>>;

/// Audio chunks that never fail.
pub type AudioStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// Upper bound on fallback chunks for one reply.
const MAX_FALLBACK_CHUNKS: usize = 50;
/// Characters of reply text per fallback chunk.
const CHARS_PER_FALLBACK_CHUNK: usize = 40;
const MIN_FALLBACK_CHUNK_BYTES: usize = 640;

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: String, voice: String) -> CapabilityResult<SpeechStream>;
}

#[derive(Serialize)]
struct SynthesisPayload<'a> {
    text: &'a str,
    voice: &'a str,
    language: Option<&'a str>,
    output_format: &'static str,
    sample_rate: u32,
    stream: bool,
}

/// Streams PCM from an HTTP endpoint that accepts a JSON synthesis request.
pub struct HttpSpeechSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    language: Option<String>,
    sample_rate: u32,
    timeout: Duration,
}

impl HttpSpeechSynthesizer {
    pub fn new(client: reqwest::Client, endpoint: String, config: &TtsProviderConfig) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            language: config.language.clone(),
            sample_rate: config.sample_rate,
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl TextToSpeech for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: String, voice: String) -> CapabilityResult<SpeechStream> {
        let payload = SynthesisPayload {
            text: &text,
            voice: &voice,
            language: self.language.as_deref(),
            output_format: "pcm",
            sample_rate: self.sample_rate,
            stream: true,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(CapabilityError::from)),
        ))
    }
}

/// Speech synthesis with a silent offline substitute.
#[derive(Clone)]
pub struct SpeechClient {
    backend: Option<Arc<dyn TextToSpeech>>,
    default_voice: String,
    sample_rate: u32,
    chunk_ms: u32,
    fallbacks: FallbackCounter,
}

impl SpeechClient {
    pub fn new(
        backend: Option<Arc<dyn TextToSpeech>>,
        config: &TtsProviderConfig,
        fallbacks: FallbackCounter,
    ) -> Self {
        Self {
            backend,
            default_voice: config.default_voice.clone(),
            sample_rate: config.sample_rate,
            chunk_ms: config.chunk_ms.max(1),
            fallbacks,
        }
    }

    pub fn fallbacks(&self) -> &FallbackCounter {
        &self.fallbacks
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        1
    }

    /// Streams synthesized audio for `text` in generation order.
    ///
    /// Blank text produces no audio. A failed primary stream is followed by
    /// silence sized to the text.
    pub fn stream_synthesize(&self, text: &str, voice: Option<&str>) -> AudioStream {
        let (tx, rx) = mpsc::channel(16);
        if text.trim().is_empty() {
            return Box::pin(ReceiverStream::new(rx));
        }
        let text = text.to_string();
        let voice = voice.unwrap_or(&self.default_voice).to_string();
        let backend = self.backend.clone();
        let fallbacks = self.fallbacks.clone();
        let chunk_bytes = self.fallback_chunk_bytes();
        let pacing = Duration::from_millis(self.chunk_ms as u64);

        tokio::spawn(async move {
            let failure = match backend {
                None => CapabilityError::NotConfigured,
                Some(backend) => match backend.synthesize(text.clone(), voice).await {
                    Err(e) => e,
                    Ok(mut stream) => {
                        let mut emitted = 0usize;
                        let mut failure = None;
                        while let Some(chunk) = stream.next().await {
                            match chunk {
                                Ok(chunk) if chunk.is_empty() => {}
                                Ok(chunk) => {
                                    emitted += 1;
                                    if tx.send(chunk).await.is_err() {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    failure = Some(e);
                                    break;
                                }
                            }
                        }
                        match failure {
                            Some(e) => e,
                            None if emitted == 0 => CapabilityError::Empty,
                            None => return,
                        }
                    }
                },
            };

            fallbacks.record(&failure);
            let silence = Bytes::from(vec![0u8; chunk_bytes]);
            for _ in 0..fallback_chunk_count(&text) {
                tokio::time::sleep(pacing).await;
                if tx.send(silence.clone()).await.is_err() {
                    return;
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    fn fallback_chunk_bytes(&self) -> usize {
        let bytes = self.sample_rate as usize * 2 * self.chunk_ms as usize / 1000;
        bytes.max(MIN_FALLBACK_CHUNK_BYTES)
    }
}

/// Number of silent chunks the fallback emits for `text`.
pub fn fallback_chunk_count(text: &str) -> usize {
    (text.chars().count() / CHARS_PER_FALLBACK_CHUNK).clamp(1, MAX_FALLBACK_CHUNKS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::Capability;
    use futures::stream;

    struct FixedSpeech(Vec<CapabilityResult<Bytes>>);

    #[async_trait]
    impl TextToSpeech for FixedSpeech {
        async fn synthesize(&self, _text: String, _voice: String) -> CapabilityResult<SpeechStream> {
            let items: Vec<CapabilityResult<Bytes>> = self
                .0
                .iter()
                .map(|item| match item {
                    Ok(bytes) => Ok(bytes.clone()),
                    Err(_) => Err(CapabilityError::Timeout),
                })
                .collect();
            Ok(Box::pin(stream::iter(items)))
        }
    }

    fn client(backend: Option<Arc<dyn TextToSpeech>>) -> SpeechClient {
        let config = TtsProviderConfig {
            chunk_ms: 1,
            ..Default::default()
        };
        SpeechClient::new(backend, &config, FallbackCounter::new(Capability::Speech))
    }

    #[tokio::test]
    async fn test_primary_chunks_pass_through() {
        let client = client(Some(Arc::new(FixedSpeech(vec![
            Ok(Bytes::from_static(&[1, 2])),
            Ok(Bytes::new()),
            Ok(Bytes::from_static(&[3, 4])),
        ]))));
        let chunks: Vec<Bytes> = client.stream_synthesize("hello", None).collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(client.fallbacks().get(), 0);
    }

    #[tokio::test]
    async fn test_fallback_silence_is_sized_to_text() {
        let client = client(None);
        let text = "x".repeat(130);
        let chunks: Vec<Bytes> = client.stream_synthesize(&text, None).collect().await;
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() == MIN_FALLBACK_CHUNK_BYTES));
        assert!(chunks.iter().all(|c| c.iter().all(|b| *b == 0)));
        assert_eq!(client.fallbacks().get(), 1);
    }

    #[tokio::test]
    async fn test_blank_text_produces_nothing() {
        let client = client(None);
        let chunks: Vec<Bytes> = client.stream_synthesize("   ", None).collect().await;
        assert!(chunks.is_empty());
        assert_eq!(client.fallbacks().get(), 0);
    }

    #[tokio::test]
    async fn test_stream_error_switches_to_fallback() {
        let client = client(Some(Arc::new(FixedSpeech(vec![
            Ok(Bytes::from_static(&[9, 9])),
            Err(CapabilityError::Timeout),
        ]))));
        let chunks: Vec<Bytes> = client.stream_synthesize("short", None).collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref(), &[9, 9]);
        assert_eq!(client.fallbacks().get(), 1);
    }

    #[test]
    fn test_fallback_chunk_count_is_capped() {
        assert_eq!(fallback_chunk_count("hi"), 1);
        assert_eq!(fallback_chunk_count(&"a".repeat(80)), 2);
        assert_eq!(fallback_chunk_count(&"a".repeat(10_000)), MAX_FALLBACK_CHUNKS);
    }
}
