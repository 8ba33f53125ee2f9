//! Conversion of container audio to mono s16le PCM.
//!
//! Ogg and WebM go through an external `ffmpeg` process; WAV is parsed in
//! process. All of it runs off the session's receive loop, bounded by a
//! process-wide semaphore so a burst of sessions cannot fork unbounded
//! decoders.

use super::AudioFormat;
use crate::{
    audio_utils::{convert_f32_to_i16, convert_i16_to_f32, i16_to_bytes, resample},
    config::{DecoderKind, DecoderSettings},
};
use async_trait::async_trait;
use std::{io::Cursor, process::Stdio, sync::Arc, time::Duration};
use tokio::{io::AsyncWriteExt, process::Command, sync::Semaphore};
use tracing::debug;

/// ffmpeg messages that routinely appear when decoding a stream that is
/// still being recorded.
const BENIGN_PATTERNS: &[&str] = &[
    "invalid data found when processing input",
    "end of file",
    "truncating packet",
    "partial file",
    "ebml header parsing failed",
    "invalid as first byte of an ebml number",
    "error while decoding stream",
    "packet corrupt",
];

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("no decoder available for {0} audio")]
    Unavailable(&'static str),
    #[error("decoder failed: {0}")]
    Failed(String),
    #[error("decode timed out")]
    Timeout,
    #[error("decoder I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid WAV data: {0}")]
    Wav(#[from] hound::Error),
    #[error("resampling failed: {0}")]
    Resample(String),
    #[error("decode task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl DecodeError {
    /// Whether this failure is expected for a partially received stream.
    pub fn is_benign(&self) -> bool {
        match self {
            DecodeError::Failed(message) => {
                let message = message.to_lowercase();
                BENIGN_PATTERNS.iter().any(|p| message.contains(p))
            }
            DecodeError::Wav(hound::Error::IoError(_)) => true,
            _ => false,
        }
    }
}

/// Turns a complete (possibly truncated) container into PCM.
#[async_trait]
pub trait AudioDecoder: Send + Sync {
    async fn decode(&self, bytes: Vec<u8>, target_rate: u32) -> Result<Vec<u8>, DecodeError>;
}

pub struct FfmpegDecoder {
    path: String,
}

impl FfmpegDecoder {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AudioDecoder for FfmpegDecoder {
    async fn decode(&self, bytes: Vec<u8>, target_rate: u32) -> Result<Vec<u8>, DecodeError> {
        let mut child = Command::new(&self.path)
            .args(["-hide_banner", "-loglevel", "error", "-i", "pipe:0"])
            .args(["-f", "s16le", "-acodec", "pcm_s16le", "-ac", "1", "-ar"])
            .arg(target_rate.to_string())
            .arg("pipe:1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| DecodeError::Failed("ffmpeg stdin unavailable".to_string()))?;
        let writer = tokio::spawn(async move {
            // ffmpeg may stop reading early on bad input; the pipe error is
            // reported through its exit status instead.
            let _ = stdin.write_all(&bytes).await;
            let _ = stdin.shutdown().await;
        });

        let output = child.wait_with_output().await?;
        let _ = writer.await;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.stdout.is_empty() {
            if !stderr.is_empty() {
                debug!(stderr = %stderr, "ffmpeg reported errors on partial input");
            }
            let mut pcm = output.stdout;
            pcm.truncate(pcm.len() - pcm.len() % 2);
            return Ok(pcm);
        }
        if output.status.success() {
            return Ok(Vec::new());
        }
        Err(DecodeError::Failed(if stderr.is_empty() {
            format!("ffmpeg exited with {}", output.status)
        } else {
            stderr
        }))
    }
}

/// Parses WAV bytes into mono PCM at `target_rate`. Tolerates a truncated
/// data chunk.
pub fn wav_to_pcm(bytes: &[u8], target_rate: u32) -> Result<Vec<u8>, DecodeError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    if spec.sample_format == hound::SampleFormat::Int
        && spec.bits_per_sample == 16
        && channels == 1
        && spec.sample_rate == target_rate
    {
        // Already in the target layout; avoid a lossy float round trip.
        let samples: Vec<i16> = reader.samples::<i16>().map_while(Result::ok).collect();
        return Ok(i16_to_bytes(&samples));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().map_while(Result::ok).collect(),
        hound::SampleFormat::Int if spec.bits_per_sample <= 16 => convert_i16_to_f32(
            &reader
                .samples::<i16>()
                .map_while(Result::ok)
                .collect::<Vec<_>>(),
        ),
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map_while(Result::ok)
                .map(|s| s as f32 / scale)
                .collect()
        }
    };

    let mono: Vec<f32> = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    let resampled = resample(mono, spec.sample_rate, target_rate)
        .map_err(|e| DecodeError::Resample(e.to_string()))?;
    Ok(i16_to_bytes(&convert_f32_to_i16(&resampled)))
}

/// Shared decoding capacity for every session.
pub struct DecodePool {
    decoder: Option<Arc<dyn AudioDecoder>>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl DecodePool {
    pub fn new(decoder: Option<Arc<dyn AudioDecoder>>, workers: usize, timeout: Duration) -> Self {
        Self {
            decoder,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
        }
    }

    pub fn from_settings(settings: &DecoderSettings) -> Self {
        let decoder = match settings.kind {
            DecoderKind::Ffmpeg => {
                Some(Arc::new(FfmpegDecoder::new(&settings.ffmpeg_path)) as Arc<dyn AudioDecoder>)
            }
            DecoderKind::None => None,
        };
        Self::new(decoder, settings.workers, settings.timeout)
    }

    /// Whether `format` can be turned into PCM by this pool.
    pub fn supports(&self, format: AudioFormat) -> bool {
        match format {
            AudioFormat::Raw | AudioFormat::Wav => true,
            AudioFormat::Ogg | AudioFormat::WebM => self.decoder.is_some(),
        }
    }

    /// Decodes the whole of `bytes`. Raw input is returned as is.
    pub async fn decode(
        &self,
        bytes: Vec<u8>,
        format: AudioFormat,
        target_rate: u32,
    ) -> Result<Vec<u8>, DecodeError> {
        if format == AudioFormat::Raw {
            return Ok(bytes);
        }
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| DecodeError::Failed("decode pool closed".to_string()))?;

        let work = async {
            match format {
                AudioFormat::Wav => {
                    tokio::task::spawn_blocking(move || wav_to_pcm(&bytes, target_rate)).await?
                }
                _ => match &self.decoder {
                    Some(decoder) => decoder.decode(bytes, target_rate).await,
                    None => Err(DecodeError::Unavailable(format.as_str())),
                },
            }
        };
        tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| DecodeError::Timeout)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_utils::bytes_to_i16;

    fn wav(samples: &[i16], rate: u32, channels: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut out = Vec::new();
        {
            let mut writer =
                hound::WavWriter::new(Cursor::new(&mut out), spec).expect("wav writer");
            for s in samples {
                writer.write_sample(*s).expect("write sample");
            }
            writer.finalize().expect("finalize");
        }
        out
    }

    #[test]
    fn test_wav_at_target_rate_is_passed_through() {
        let pcm = wav_to_pcm(&wav(&[0, 1000, -1000, 2000], 16000, 1), 16000).expect("decode");
        let samples = bytes_to_i16(&pcm);
        assert_eq!(samples.len(), 4);
        assert!((samples[1] - 1000).abs() <= 1);
    }

    #[test]
    fn test_mono_wav_at_target_rate_is_bit_exact() {
        let samples = [i16::MIN, -12345, -1, 0, 1, 7, 12345, i16::MAX];
        let pcm = wav_to_pcm(&wav(&samples, 16000, 1), 16000).expect("decode");
        assert_eq!(bytes_to_i16(&pcm), samples);
    }

    #[test]
    fn test_stereo_wav_is_downmixed() {
        let pcm = wav_to_pcm(&wav(&[1000, 3000, 1000, 3000], 16000, 2), 16000).expect("decode");
        let samples = bytes_to_i16(&pcm);
        assert_eq!(samples.len(), 2);
        assert!((samples[0] - 2000).abs() <= 1);
    }

    #[test]
    fn test_truncated_wav_decodes_what_is_there() {
        let full = wav(&[500; 100], 16000, 1);
        let pcm = wav_to_pcm(&full[..full.len() - 51], 16000).expect("decode");
        assert_eq!(bytes_to_i16(&pcm).len(), 74);
    }

    #[test]
    fn test_benign_classification() {
        assert!(DecodeError::Failed("pipe:0: Invalid data found when processing input".into()).is_benign());
        assert!(!DecodeError::Failed("Unknown encoder".into()).is_benign());
        assert!(!DecodeError::Timeout.is_benign());
    }

    #[tokio::test]
    async fn test_pool_without_decoder() {
        let pool = DecodePool::new(None, 1, Duration::from_secs(1));
        assert!(pool.supports(AudioFormat::Raw));
        assert!(!pool.supports(AudioFormat::Ogg));
        let raw = pool.decode(vec![1, 2], AudioFormat::Raw, 16000).await.expect("raw");
        assert_eq!(raw, vec![1, 2]);
        let err = pool.decode(b"OggS".to_vec(), AudioFormat::Ogg, 16000).await;
        assert!(matches!(err, Err(DecodeError::Unavailable("ogg"))));
    }

    struct SlowDecoder;

    #[async_trait]
    impl AudioDecoder for SlowDecoder {
        async fn decode(&self, _bytes: Vec<u8>, _rate: u32) -> Result<Vec<u8>, DecodeError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_pool_times_out() {
        let pool = DecodePool::new(Some(Arc::new(SlowDecoder)), 1, Duration::from_millis(20));
        let err = pool.decode(vec![0x1a, 0x45, 0xdf, 0xa3], AudioFormat::WebM, 16000).await;
        assert!(matches!(err, Err(DecodeError::Timeout)));
    }
}
