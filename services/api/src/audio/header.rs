//! Container headers kept aside so a buffer that lost its opening fragment
//! can still be decoded.

use super::AudioFormat;
use bytes::Bytes;

/// The leading bytes a decoder needs before any later fragment makes sense.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerHeader {
    bytes: Bytes,
    /// Offset in the first fragment where audio payload begins.
    payload_start: usize,
    block_align: usize,
}

impl ContainerHeader {
    /// Captures the header from the first fragment of a turn. Raw PCM has
    /// none.
    ///
    /// WAV headers are parsed up to the `data` chunk. Compressed containers
    /// keep the whole first fragment, since their setup pages cannot be
    /// told apart from audio without a demuxer.
    pub fn capture(format: AudioFormat, first: &Bytes) -> Option<Self> {
        match format {
            AudioFormat::Raw => None,
            AudioFormat::Wav => Some(wav_header(first).unwrap_or_else(|| Self::whole(first))),
            AudioFormat::Ogg | AudioFormat::WebM => Some(Self::whole(first)),
        }
    }

    fn whole(first: &Bytes) -> Self {
        Self {
            bytes: first.clone(),
            payload_start: 0,
            block_align: 1,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether the header carries audio of its own, which shows up at the
    /// front of every decode that includes it.
    pub fn carries_audio(&self) -> bool {
        self.payload_start == 0
    }

    /// Audio payload bytes in the first fragment.
    pub fn first_payload(&self, first_len: usize) -> usize {
        first_len.saturating_sub(self.payload_start)
    }

    /// Bytes to skip at the front of the surviving payload so decoding
    /// restarts on a whole sample frame.
    pub fn realign(&self, evicted_payload: usize) -> usize {
        (self.block_align - evicted_payload % self.block_align) % self.block_align
    }
}

/// Locates the `data` chunk of a RIFF/WAVE header.
fn wav_header(first: &Bytes) -> Option<ContainerHeader> {
    if first.len() < 12 || &first[0..4] != b"RIFF" || &first[8..12] != b"WAVE" {
        return None;
    }
    let mut block_align = 1;
    let mut pos = 12;
    while pos + 8 <= first.len() {
        let id = &first[pos..pos + 4];
        let size = u32::from_le_bytes(first[pos + 4..pos + 8].try_into().ok()?) as usize;
        let body = pos + 8;
        if id == b"data" {
            return Some(ContainerHeader {
                bytes: first.slice(..body),
                payload_start: body,
                block_align,
            });
        }
        if id == b"fmt " && body + 14 <= first.len() {
            let align = u16::from_le_bytes([first[body + 12], first[body + 13]]);
            block_align = usize::from(align.max(1));
        }
        pos = body.checked_add(size)?.checked_add(size % 2)?;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::io::Cursor;

    fn wav(samples: &[i16], channels: u16) -> Vec<u8> {
        let spec = WavSpec {
            channels,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut out = Vec::new();
        {
            let mut writer = WavWriter::new(Cursor::new(&mut out), spec).expect("wav writer");
            for s in samples {
                writer.write_sample(*s).expect("write sample");
            }
            writer.finalize().expect("finalize");
        }
        out
    }

    #[test]
    fn test_wav_header_stops_at_data_chunk() {
        let first = Bytes::from(wav(&[7; 10], 2));
        let header = ContainerHeader::capture(AudioFormat::Wav, &first).expect("header");
        assert_eq!(header.bytes().len(), 44);
        assert!(!header.carries_audio());
        assert_eq!(header.first_payload(first.len()), 20);
        // Stereo 16-bit frames are four bytes wide.
        assert_eq!(header.realign(6), 2);
        assert_eq!(header.realign(8), 0);
    }

    #[test]
    fn test_short_wav_fragment_keeps_whole_fragment() {
        let first = Bytes::from(wav(&[1, 2], 1)[..30].to_vec());
        let header = ContainerHeader::capture(AudioFormat::Wav, &first).expect("header");
        assert!(header.carries_audio());
        assert_eq!(header.bytes(), &first[..]);
    }

    #[test]
    fn test_compressed_containers_keep_first_fragment() {
        let first = Bytes::from_static(b"OggS\x00\x02setup");
        let header = ContainerHeader::capture(AudioFormat::Ogg, &first).expect("header");
        assert_eq!(header.bytes(), &first[..]);
        assert_eq!(header.realign(3), 0);
        assert!(ContainerHeader::capture(AudioFormat::Raw, &first).is_none());
    }
}
