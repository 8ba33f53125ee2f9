//! Inbound audio handling: buffering, decoding to PCM, and voice activity.

pub mod decode;
pub mod header;
pub mod ingest;
pub mod normalizer;
pub mod vad;

/// Container type of a client's audio stream, sniffed from its first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Ogg,
    WebM,
    Wav,
    /// Anything unrecognised is assumed to be mono s16le PCM already.
    Raw,
}

impl AudioFormat {
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(b"OggS") {
            AudioFormat::Ogg
        } else if bytes.starts_with(&[0x1a, 0x45, 0xdf, 0xa3]) {
            AudioFormat::WebM
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            AudioFormat::Wav
        } else {
            AudioFormat::Raw
        }
    }

    /// Whether the stream has to go through a decoder to become PCM.
    pub fn needs_decode(self) -> bool {
        !matches!(self, AudioFormat::Raw)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AudioFormat::Ogg => "ogg",
            AudioFormat::WebM => "webm",
            AudioFormat::Wav => "wav",
            AudioFormat::Raw => "raw",
        }
    }
}
