//! Speech-to-text capability.

use crate::{
    config::SttProviderConfig,
    error::{CapabilityError, CapabilityResult},
    fallback::FallbackCounter,
    generic_types::TranscriptionAudio,
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::header::CONTENT_TYPE;
use std::{io::Cursor, sync::Arc, time::Duration};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, instrument};

/// Bytes per second of 16 kHz mono 16-bit PCM.
const PCM_BYTES_PER_SECOND: usize = 32_000;

/// A primary transcription provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribes a complete audio payload (WAV or container bytes).
    async fn transcribe(&self, audio: Vec<u8>) -> CapabilityResult<String>;
}

/// Posts audio as `application/octet-stream` and reads `text`/`transcript`.
pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: String,
    language: Option<String>,
    sample_rate: u32,
    timeout: Duration,
}

impl HttpTranscriber {
    pub fn new(client: reqwest::Client, endpoint: String, config: &SttProviderConfig) -> Self {
        Self {
            client,
            endpoint,
            language: config.language.clone(),
            sample_rate: config.sample_rate,
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl SpeechToText for HttpTranscriber {
    async fn transcribe(&self, audio: Vec<u8>) -> CapabilityResult<String> {
        let mut params = vec![("sample_rate", self.sample_rate.to_string())];
        if let Some(language) = &self.language {
            params.push(("language", language.clone()));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .query(&params)
            .header(CONTENT_TYPE, "application/octet-stream")
            .timeout(self.timeout)
            .body(audio)
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = response.json().await?;
        Ok(text_from_json(&body).unwrap_or_default())
    }
}

/// Sends the audio as a single binary message and waits for the first
/// non-empty reply.
pub struct WebSocketTranscriber {
    endpoint: String,
    timeout: Duration,
}

impl WebSocketTranscriber {
    pub fn new(endpoint: String, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }
}

#[async_trait]
impl SpeechToText for WebSocketTranscriber {
    async fn transcribe(&self, audio: Vec<u8>) -> CapabilityResult<String> {
        let exchange = async {
            let (mut stream, _) = connect_async(self.endpoint.as_str()).await?;
            stream.send(WsMessage::Binary(audio.into())).await?;
            while let Some(message) = stream.next().await {
                let text = match message? {
                    WsMessage::Text(text) => extract_text(text.as_str()),
                    WsMessage::Binary(bytes) => match std::str::from_utf8(&bytes) {
                        Ok(text) => extract_text(text),
                        Err(_) => String::new(),
                    },
                    WsMessage::Close(_) => break,
                    _ => String::new(),
                };
                if !text.is_empty() {
                    let _ = stream.close(None).await;
                    return Ok(text);
                }
            }
            Ok::<_, CapabilityError>(String::new())
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| CapabilityError::Timeout)?
    }
}

/// Picks the transport from the endpoint scheme.
pub fn transcriber_for(
    config: &SttProviderConfig,
    client: reqwest::Client,
) -> Option<Arc<dyn SpeechToText>> {
    let endpoint = config.endpoint.clone()?;
    if endpoint.starts_with("ws") {
        Some(Arc::new(WebSocketTranscriber::new(endpoint, config.timeout)))
    } else if endpoint.starts_with("http") {
        Some(Arc::new(HttpTranscriber::new(client, endpoint, config)))
    } else {
        None
    }
}

/// Transcription with a templated offline substitute.
#[derive(Clone)]
pub struct TranscriptionClient {
    backend: Option<Arc<dyn SpeechToText>>,
    sample_rate: u32,
    enable_partial: bool,
    allow_fallback: bool,
    fallbacks: FallbackCounter,
}

impl TranscriptionClient {
    pub fn new(
        backend: Option<Arc<dyn SpeechToText>>,
        config: &SttProviderConfig,
        fallbacks: FallbackCounter,
    ) -> Self {
        Self {
            backend,
            sample_rate: config.sample_rate,
            enable_partial: config.enable_partial,
            allow_fallback: config.allow_fallback,
            fallbacks,
        }
    }

    pub fn fallbacks(&self) -> &FallbackCounter {
        &self.fallbacks
    }

    /// A coarse progress string shown while audio is still being collected.
    pub fn build_partial(&self, buffered_ms: u64) -> Option<String> {
        if !self.enable_partial || buffered_ms == 0 {
            return None;
        }
        Some(format!("[capturing ~{buffered_ms}ms]"))
    }

    /// Transcribes one utterance.
    ///
    /// Empty audio yields an empty transcript. A failed or empty primary
    /// result is replaced by the fallback text unless fallback is disabled,
    /// in which case the provider error is returned.
    #[instrument(name = "transcribe", skip_all, fields(bytes = audio.len()))]
    pub async fn transcribe(&self, audio: TranscriptionAudio) -> CapabilityResult<String> {
        if audio.is_empty() {
            return Ok(String::new());
        }
        let byte_length = audio.len();

        let failure = match self.primary(audio).await {
            Ok(text) => return Ok(text),
            Err(e) => e,
        };
        if !self.allow_fallback {
            return Err(failure);
        }
        self.fallbacks.record(&failure);
        Ok(fallback_transcript(byte_length))
    }

    async fn primary(&self, audio: TranscriptionAudio) -> CapabilityResult<String> {
        let backend = self.backend.as_ref().ok_or(CapabilityError::NotConfigured)?;
        let payload = match audio {
            TranscriptionAudio::Pcm(pcm) => pcm_to_wav(&pcm, self.sample_rate)?,
            TranscriptionAudio::Encoded(bytes) => bytes,
        };
        let text = backend.transcribe(payload).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(CapabilityError::Empty);
        }
        Ok(text.to_string())
    }
}

/// The offline transcript, parameterized by the estimated audio duration.
pub fn fallback_transcript(byte_length: usize) -> String {
    let seconds = byte_length / PCM_BYTES_PER_SECOND;
    if seconds > 0 {
        format!("(mock) received ~{seconds}s of audio")
    } else {
        "(mock) received audio".to_string()
    }
}

/// Wraps mono s16le PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut bytes = Vec::with_capacity(pcm.len() + 44);
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec)?;
        for sample in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(bytes)
}

fn text_from_json(value: &serde_json::Value) -> Option<String> {
    value
        .get("text")
        .or_else(|| value.get("transcript"))
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Reads a provider reply that is either JSON with `text`/`transcript` or plain text.
fn extract_text(message: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(message) {
        Ok(value) if value.is_object() => text_from_json(&value).unwrap_or_default(),
        _ => {
            debug!("Transcription reply is not JSON, using it verbatim");
            message.trim().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::Capability;

    fn client_with(backend: Option<Arc<dyn SpeechToText>>, allow_fallback: bool) -> TranscriptionClient {
        let config = SttProviderConfig {
            allow_fallback,
            ..Default::default()
        };
        TranscriptionClient::new(
            backend,
            &config,
            FallbackCounter::new(Capability::Transcription),
        )
    }

    #[tokio::test]
    async fn test_primary_result_is_trimmed() {
        let mut mock = MockSpeechToText::new();
        mock.expect_transcribe()
            .times(1)
            .returning(|_| Ok("  hello there \n".to_string()));
        let client = client_with(Some(Arc::new(mock)), true);

        let probe = client.fallbacks().probe();
        let text = client
            .transcribe(TranscriptionAudio::Pcm(vec![0; 640]))
            .await
            .unwrap();
        assert_eq!(text, "hello there");
        assert!(!probe.used());
    }

    #[tokio::test]
    async fn test_pcm_is_wrapped_in_wav_before_upload() {
        let mut mock = MockSpeechToText::new();
        mock.expect_transcribe()
            .withf(|audio| audio.starts_with(b"RIFF") && audio.len() == 44 + 640)
            .returning(|_| Ok("ok".to_string()));
        let client = client_with(Some(Arc::new(mock)), true);
        let text = client
            .transcribe(TranscriptionAudio::Pcm(vec![1; 640]))
            .await
            .unwrap();
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn test_encoded_audio_is_forwarded_untouched() {
        let mut mock = MockSpeechToText::new();
        mock.expect_transcribe()
            .withf(|audio| audio.as_slice() == b"OggS-payload")
            .returning(|_| Ok("ogg".to_string()));
        let client = client_with(Some(Arc::new(mock)), true);
        let text = client
            .transcribe(TranscriptionAudio::Encoded(b"OggS-payload".to_vec()))
            .await
            .unwrap();
        assert_eq!(text, "ogg");
    }

    #[tokio::test]
    async fn test_failure_falls_back_with_duration_estimate() {
        let mut mock = MockSpeechToText::new();
        mock.expect_transcribe()
            .returning(|_| Err(CapabilityError::InvalidResponse("boom".into())));
        let client = client_with(Some(Arc::new(mock)), true);

        let probe = client.fallbacks().probe();
        let text = client
            .transcribe(TranscriptionAudio::Pcm(vec![0; 64_000]))
            .await
            .unwrap();
        assert_eq!(text, "(mock) received ~2s of audio");
        assert!(probe.used());
    }

    #[tokio::test]
    async fn test_empty_primary_result_counts_as_fallback() {
        let mut mock = MockSpeechToText::new();
        mock.expect_transcribe().returning(|_| Ok("   ".to_string()));
        let client = client_with(Some(Arc::new(mock)), true);
        let text = client
            .transcribe(TranscriptionAudio::Pcm(vec![0; 100]))
            .await
            .unwrap();
        assert_eq!(text, "(mock) received audio");
        assert_eq!(client.fallbacks().get(), 1);
    }

    #[tokio::test]
    async fn test_disabled_fallback_surfaces_error() {
        let mut mock = MockSpeechToText::new();
        mock.expect_transcribe()
            .returning(|_| Err(CapabilityError::Timeout));
        let client = client_with(Some(Arc::new(mock)), false);
        let result = client.transcribe(TranscriptionAudio::Pcm(vec![0; 100])).await;
        assert!(matches!(result, Err(CapabilityError::Timeout)));
        assert_eq!(client.fallbacks().get(), 0);
    }

    #[tokio::test]
    async fn test_empty_audio_is_not_sent() {
        let mock = MockSpeechToText::new();
        let client = client_with(Some(Arc::new(mock)), true);
        let text = client
            .transcribe(TranscriptionAudio::Pcm(Vec::new()))
            .await
            .unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn test_partial_text() {
        let client = client_with(None, true);
        assert_eq!(client.build_partial(0), None);
        assert_eq!(client.build_partial(60).as_deref(), Some("[capturing ~60ms]"));
    }

    #[test]
    fn test_extract_text_variants() {
        assert_eq!(extract_text(r#"{"text": " hi "}"#), "hi");
        assert_eq!(extract_text(r#"{"transcript": "yo"}"#), "yo");
        assert_eq!(extract_text(r#"{"status": "partial"}"#), "");
        assert_eq!(extract_text("plain words\n"), "plain words");
    }

    #[test]
    fn test_transport_selection() {
        let client = reqwest::Client::new();
        let mut config = SttProviderConfig::default();
        assert!(transcriber_for(&config, client.clone()).is_none());
        config.endpoint = Some("ws://localhost:9000/stt".into());
        assert!(transcriber_for(&config, client.clone()).is_some());
        config.endpoint = Some("ftp://nope".into());
        assert!(transcriber_for(&config, client).is_none());
    }
}
