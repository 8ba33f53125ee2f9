//! Bounded buffer of raw fragments for the turn being collected.

use super::header::ContainerHeader;
use bytes::Bytes;
use std::collections::VecDeque;

/// A fragment dropped to make room, with the PCM that was decoded from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Eviction {
    pub fragment: Bytes,
    pub pcm_span: usize,
}

/// Which part of the buffer a decode covered, so its output can be lined up
/// with the buffer when it comes back, even if fragments were evicted while
/// it ran.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeWindow {
    /// PCM already evicted when the decode was started.
    origin: usize,
    /// Leading output bytes that belong to audio inside the pinned header.
    strip: usize,
    /// Sequence number one past the last fragment included.
    end_seq: u64,
    /// Included fragments with no PCM yet, and their payload sizes.
    pending: Vec<(u64, usize)>,
}

impl DecodeWindow {
    pub fn strip(&self) -> usize {
        self.strip
    }
}

/// Bytes to hand to a decoder and the window they represent.
#[derive(Debug, Clone)]
pub struct DecodeRequest {
    pub bytes: Vec<u8>,
    pub window: DecodeWindow,
}

/// FIFO of raw fragments and the PCM decoded from them so far.
///
/// Fragments are numbered by arrival order. `spans[i]` is the number of PCM
/// bytes attributed to `fragments[i]`, so evicting the oldest fragment also
/// drops exactly its share of PCM. The buffer's PCM timeline is
/// `evicted_pcm` followed by `pcm`.
#[derive(Debug)]
pub struct IngestBuffer {
    max_fragments: usize,
    fragments: VecDeque<Bytes>,
    spans: VecDeque<usize>,
    pcm: Vec<u8>,
    header: Option<ContainerHeader>,
    /// PCM decoded from the audio inside the pinned header.
    header_pcm: usize,
    /// Sequence number one past the last fragment with PCM attributed.
    decoded_seq: u64,
    evictions: u64,
    evicted_pcm: usize,
    evicted_payload: usize,
}

impl IngestBuffer {
    pub fn new(max_fragments: usize) -> Self {
        Self {
            max_fragments: max_fragments.max(1),
            fragments: VecDeque::new(),
            spans: VecDeque::new(),
            pcm: Vec::new(),
            header: None,
            header_pcm: 0,
            decoded_seq: 0,
            evictions: 0,
            evicted_pcm: 0,
            evicted_payload: 0,
        }
    }

    /// Keeps the container header for decoding after the first fragment is
    /// evicted. Only accepted before anything was buffered.
    pub fn pin_header(&mut self, header: ContainerHeader) {
        if self.fragments.is_empty() && self.evictions == 0 {
            self.header = Some(header);
        }
    }

    /// Appends a fragment, evicting the oldest one if the buffer is full.
    pub fn push(&mut self, fragment: Bytes) -> Option<Eviction> {
        let evicted = if self.fragments.len() >= self.max_fragments {
            self.evict_oldest()
        } else {
            None
        };
        self.fragments.push_back(fragment);
        self.spans.push_back(0);
        evicted
    }

    fn evict_oldest(&mut self) -> Option<Eviction> {
        let fragment = self.fragments.pop_front()?;
        let pcm_span = self.spans.pop_front().unwrap_or(0).min(self.pcm.len());
        self.pcm.drain(..pcm_span);

        let seq = self.evictions;
        if seq == 0 {
            self.header_pcm += pcm_span;
        }
        self.evicted_pcm += pcm_span;
        self.evicted_payload += self.payload_len(seq, fragment.len());
        self.evictions += 1;
        Some(Eviction { fragment, pcm_span })
    }

    fn payload_len(&self, seq: u64, len: usize) -> usize {
        match &self.header {
            Some(header) if seq == 0 => header.first_payload(len),
            _ => len,
        }
    }

    fn end_seq(&self) -> u64 {
        self.evictions + self.fragments.len() as u64
    }

    /// Records PCM that belongs to the newest fragment, as for raw input.
    pub fn append_pcm(&mut self, pcm: &[u8]) {
        let Some(span) = self.spans.back_mut() else {
            return;
        };
        *span += pcm.len();
        self.pcm.extend_from_slice(pcm);
        self.decoded_seq = self.end_seq();
    }

    /// Bytes a decoder can read from the start: the buffered fragments,
    /// behind the pinned header once the opening fragment is gone.
    pub fn decode_input(&self) -> Vec<u8> {
        match &self.header {
            Some(header) if self.evictions > 0 => {
                let skip = header.realign(self.evicted_payload);
                let raw = self.raw_bytes();
                let mut out = Vec::with_capacity(header.bytes().len() + raw.len());
                out.extend_from_slice(header.bytes());
                out.extend_from_slice(raw.get(skip..).unwrap_or_default());
                out
            }
            _ => self.raw_bytes(),
        }
    }

    fn strip(&self) -> usize {
        match &self.header {
            Some(header) if self.evictions > 0 && header.carries_audio() => self.header_pcm,
            _ => 0,
        }
    }

    /// Snapshot of the buffer for a decode of everything buffered so far.
    pub fn decode_request(&self) -> DecodeRequest {
        let end_seq = self.end_seq();
        let pending = (self.decoded_seq.max(self.evictions)..end_seq)
            .map(|seq| {
                let index = (seq - self.evictions) as usize;
                let len = self.fragments.get(index).map_or(0, Bytes::len);
                (seq, self.payload_len(seq, len))
            })
            .collect();
        DecodeRequest {
            bytes: self.decode_input(),
            window: DecodeWindow {
                origin: self.evicted_pcm,
                strip: self.strip(),
                end_seq,
                pending,
            },
        }
    }

    /// Takes in the full output of a decode started with `window` and
    /// returns the PCM that was new to the buffer.
    ///
    /// The output is rebased onto the buffer's timeline: PCM of fragments
    /// evicted while the decode ran is skipped, as is everything already
    /// held. New PCM is split across the fragments that had none, by
    /// payload size.
    pub fn absorb(&mut self, window: &DecodeWindow, decoded: &[u8]) -> Vec<u8> {
        let body = decoded.get(window.strip..).unwrap_or_default();
        let held = self.evicted_pcm.saturating_sub(window.origin) + self.pcm.len();
        let Some(fresh) = body.get(held..) else {
            return Vec::new();
        };
        let fresh = &fresh[..fresh.len() - fresh.len() % 2];
        if fresh.is_empty() {
            return Vec::new();
        }

        let mut accepted = Vec::with_capacity(fresh.len());
        if window.pending.is_empty() {
            // The decoder caught up on audio it had held back.
            self.attribute(window.end_seq.saturating_sub(1), fresh, &mut accepted);
        } else {
            let total = window.pending.iter().map(|(_, w)| w).sum::<usize>().max(1);
            let mut rest = fresh;
            for (i, (seq, weight)) in window.pending.iter().enumerate() {
                let take = if i + 1 == window.pending.len() {
                    rest.len()
                } else {
                    (fresh.len() * weight / total).min(rest.len()) & !1
                };
                let (share, tail) = rest.split_at(take);
                self.attribute(*seq, share, &mut accepted);
                rest = tail;
            }
        }
        self.decoded_seq = self.decoded_seq.max(window.end_seq);
        accepted
    }

    fn attribute(&mut self, seq: u64, share: &[u8], accepted: &mut Vec<u8>) {
        if share.is_empty() {
            return;
        }
        if seq < self.evictions {
            // The fragment left while its decode was running.
            self.evicted_pcm += share.len();
            if seq == 0 {
                self.header_pcm += share.len();
            }
            return;
        }
        if let Some(span) = self.spans.get_mut((seq - self.evictions) as usize) {
            *span += share.len();
        }
        self.pcm.extend_from_slice(share);
        accepted.extend_from_slice(share);
    }

    /// All raw bytes currently buffered, in arrival order.
    pub fn raw_bytes(&self) -> Vec<u8> {
        let total = self.fragments.iter().map(Bytes::len).sum();
        let mut out = Vec::with_capacity(total);
        for fragment in &self.fragments {
            out.extend_from_slice(fragment);
        }
        out
    }

    pub fn pcm(&self) -> &[u8] {
        &self.pcm
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Total evictions since this buffer was created.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Whether some fragments have no PCM attributed yet.
    pub fn has_undecoded(&self) -> bool {
        self.decoded_seq < self.end_seq()
    }

    /// Empties the buffer at the end of a turn, returning raw fragments and
    /// PCM.
    pub fn drain(&mut self) -> (Vec<Bytes>, Vec<u8>) {
        self.spans.clear();
        (
            self.fragments.drain(..).collect(),
            std::mem::take(&mut self.pcm),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioFormat;

    fn frag(n: u8) -> Bytes {
        Bytes::from(vec![n; 4])
    }

    #[test]
    fn test_no_evictions_within_capacity() {
        let mut buffer = IngestBuffer::new(3);
        for i in 0..3 {
            assert!(buffer.push(frag(i)).is_none());
        }
        assert_eq!(buffer.len(), 3);
        let (fragments, _) = buffer.drain();
        assert_eq!(fragments.len(), 3);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut buffer = IngestBuffer::new(2);
        let mut evicted = Vec::new();
        for i in 0..5 {
            if let Some(e) = buffer.push(frag(i)) {
                evicted.push(e.fragment[0]);
            }
        }
        assert_eq!(evicted, vec![0, 1, 2]);
        assert_eq!(buffer.evictions(), 3);
        assert_eq!(buffer.raw_bytes(), [frag(3), frag(4)].concat());
    }

    #[test]
    fn test_eviction_drops_aligned_pcm() {
        let mut buffer = IngestBuffer::new(2);
        buffer.push(frag(1));
        buffer.append_pcm(&[1, 1]);
        buffer.push(frag(2));
        buffer.append_pcm(&[2, 2, 2, 2]);
        assert!(!buffer.has_undecoded());

        let eviction = buffer.push(frag(3)).expect("full buffer evicts");
        assert_eq!(eviction.pcm_span, 2);
        assert_eq!(buffer.pcm(), &[2, 2, 2, 2]);
        assert!(buffer.has_undecoded());
    }

    #[test]
    fn test_decoded_pcm_is_split_across_new_fragments() {
        let mut buffer = IngestBuffer::new(2);
        buffer.push(frag(1));
        buffer.push(frag(2));
        let request = buffer.decode_request();
        let accepted = buffer.absorb(&request.window, &[frag(1), frag(2)].concat());
        assert_eq!(accepted.len(), 8);
        assert!(!buffer.has_undecoded());

        let eviction = buffer.push(frag(3)).expect("full buffer evicts");
        assert_eq!(eviction.pcm_span, 4);
        assert_eq!(buffer.pcm(), &frag(2)[..]);
    }

    #[test]
    fn test_decode_outlived_by_eviction_is_rebased() {
        let mut buffer = IngestBuffer::new(2);
        buffer.push(frag(1));
        buffer.push(frag(2));
        let first = buffer.decode_request();
        // Evicted before its PCM came back.
        buffer.push(frag(3));

        let accepted = buffer.absorb(&first.window, &[frag(1), frag(2)].concat());
        assert_eq!(accepted, frag(2).to_vec());
        assert_eq!(buffer.pcm(), &frag(2)[..]);

        let second = buffer.decode_request();
        let accepted = buffer.absorb(&second.window, &[frag(2), frag(3)].concat());
        assert_eq!(accepted, frag(3).to_vec());
        assert_eq!(buffer.pcm(), &[frag(2), frag(3)].concat()[..]);
    }

    #[test]
    fn test_decoded_fragment_evicted_mid_decode_is_skipped() {
        let mut buffer = IngestBuffer::new(2);
        buffer.push(frag(1));
        buffer.append_pcm(&frag(1));
        buffer.push(frag(2));
        let request = buffer.decode_request();
        buffer.push(frag(3));

        let accepted = buffer.absorb(&request.window, &[frag(1), frag(2)].concat());
        assert_eq!(accepted, frag(2).to_vec());
        assert_eq!(buffer.pcm(), &frag(2)[..]);
    }

    #[test]
    fn test_wav_header_survives_eviction() {
        let header = b"RIFF\x00\x00\x00\x00WAVEdata\x00\x00\x00\x00".to_vec();
        let first = Bytes::from([header.clone(), vec![1; 4]].concat());
        let mut buffer = IngestBuffer::new(2);
        buffer.pin_header(
            ContainerHeader::capture(AudioFormat::Wav, &first).expect("wav header"),
        );
        buffer.push(first);
        buffer.push(frag(2));
        buffer.push(frag(3));

        let request = buffer.decode_request();
        assert_eq!(request.bytes, [header, frag(2).to_vec(), frag(3).to_vec()].concat());
        assert_eq!(request.window.strip(), 0);
    }

    #[test]
    fn test_container_header_audio_is_stripped() {
        let first = Bytes::from_static(b"OggS");
        let mut buffer = IngestBuffer::new(2);
        buffer.pin_header(
            ContainerHeader::capture(AudioFormat::Ogg, &first).expect("ogg header"),
        );
        buffer.push(first.clone());
        buffer.push(frag(2));
        let request = buffer.decode_request();
        buffer.absorb(&request.window, &[frag(1), frag(2)].concat());
        buffer.push(frag(3));

        let request = buffer.decode_request();
        assert_eq!(request.bytes, [first, frag(2), frag(3)].concat());
        assert_eq!(request.window.strip(), 4);
        let accepted = buffer.absorb(&request.window, &[frag(1), frag(2), frag(3)].concat());
        assert_eq!(accepted, frag(3).to_vec());
    }
}
