//! Per-turn container sniffing and decode failure reporting.
//!
//! Compressed streams cannot be decoded fragment by fragment, so every
//! decode covers the whole buffered container; [`IngestBuffer`] works out
//! which part of the output is new.
//!
//! [`IngestBuffer`]: super::ingest::IngestBuffer

use super::{AudioFormat, decode::DecodeError};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct FormatNormalizer {
    format: Option<AudioFormat>,
    warned: bool,
}

impl FormatNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sniffs the container from the first fragment of the turn. Later calls
    /// return the format already chosen.
    pub fn observe(&mut self, fragment: &[u8]) -> AudioFormat {
        *self
            .format
            .get_or_insert_with(|| AudioFormat::detect(fragment))
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    /// Logs a decode failure. Expected failures on partial input stay at
    /// debug level; anything else warns once per turn.
    pub fn report(&mut self, error: &DecodeError) {
        if error.is_benign() {
            debug!(error = %error, "partial container not decodable yet");
        } else if !self.warned {
            self.warned = true;
            warn!(
                error = %error,
                format = self.format.map(AudioFormat::as_str).unwrap_or("unknown"),
                "audio decode failed"
            );
        } else {
            debug!(error = %error, "audio decode failed again");
        }
    }

    pub fn has_warned(&self) -> bool {
        self.warned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_is_fixed_by_first_fragment() {
        let mut normalizer = FormatNormalizer::new();
        assert_eq!(normalizer.observe(b"OggS\x00"), AudioFormat::Ogg);
        assert_eq!(normalizer.observe(b"\x00\x01"), AudioFormat::Ogg);
        assert_eq!(normalizer.format(), Some(AudioFormat::Ogg));
    }

    #[test]
    fn test_warns_once_per_turn() {
        let mut normalizer = FormatNormalizer::new();
        normalizer.report(&DecodeError::Failed("End of file".into()));
        assert!(!normalizer.has_warned());
        normalizer.report(&DecodeError::Timeout);
        assert!(normalizer.has_warned());
    }
}
