//! End-of-utterance detection over PCM frames.

use crate::{
    audio_utils::{BYTES_PER_SAMPLE, rms_i16},
    config::{VadMode, VadSettings},
};

/// Classifies one frame of mono s16le PCM.
pub trait FrameClassifier: Send + Sync {
    fn is_speech(&mut self, frame: &[u8]) -> bool;
}

/// Treats a frame as speech when its RMS exceeds a fixed threshold.
pub struct EnergyClassifier {
    threshold: f32,
}

impl EnergyClassifier {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl FrameClassifier for EnergyClassifier {
    fn is_speech(&mut self, frame: &[u8]) -> bool {
        rms_i16(frame) > self.threshold
    }
}

/// Accumulates consecutive silence across fragments and signals once the
/// threshold is reached.
///
/// Frames are cut from the concatenated PCM stream, so the trigger point
/// does not depend on how the client split its audio.
pub struct VoiceActivityDetector {
    classifier: Option<Box<dyn FrameClassifier>>,
    frame_bytes: usize,
    frame_ms: u32,
    threshold_ms: u32,
    pending: Vec<u8>,
    silence_ms: u32,
    triggered: bool,
}

impl VoiceActivityDetector {
    pub fn new(
        classifier: Option<Box<dyn FrameClassifier>>,
        sample_rate: u32,
        frame_ms: u32,
        threshold_ms: u32,
    ) -> Self {
        let frame_ms = frame_ms.max(1);
        let frame_bytes = (sample_rate as usize * BYTES_PER_SAMPLE * frame_ms as usize / 1000)
            .max(BYTES_PER_SAMPLE);
        Self {
            classifier,
            frame_bytes,
            frame_ms,
            threshold_ms,
            pending: Vec::new(),
            silence_ms: 0,
            triggered: false,
        }
    }

    pub fn from_settings(settings: &VadSettings, sample_rate: u32) -> Self {
        let classifier: Option<Box<dyn FrameClassifier>> = match settings.mode {
            VadMode::Energy => Some(Box::new(EnergyClassifier::new(settings.energy_threshold))),
            VadMode::Off => None,
        };
        Self::new(classifier, sample_rate, settings.frame_ms, settings.silence_ms)
    }

    pub fn is_enabled(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn silence_ms(&self) -> u32 {
        self.silence_ms
    }

    /// Feeds newly decoded PCM. Returns `true` exactly once, on the frame
    /// that brings consecutive silence to the threshold.
    pub fn push(&mut self, pcm: &[u8]) -> bool {
        let Some(classifier) = self.classifier.as_mut() else {
            return false;
        };
        if self.triggered {
            return false;
        }
        self.pending.extend_from_slice(pcm);

        let mut consumed = 0;
        while self.pending.len() - consumed >= self.frame_bytes {
            let frame = &self.pending[consumed..consumed + self.frame_bytes];
            consumed += self.frame_bytes;
            if classifier.is_speech(frame) {
                self.silence_ms = 0;
            } else {
                self.silence_ms += self.frame_ms;
                if self.silence_ms >= self.threshold_ms {
                    self.triggered = true;
                    break;
                }
            }
        }
        self.pending.drain(..consumed);
        self.triggered
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.silence_ms = 0;
        self.triggered = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_utils::i16_to_bytes;

    const RATE: u32 = 16_000;

    fn frame(amplitude: i16) -> Vec<u8> {
        // 20 ms at 16 kHz.
        i16_to_bytes(&vec![amplitude; 320])
    }

    fn detector() -> VoiceActivityDetector {
        VoiceActivityDetector::new(Some(Box::new(EnergyClassifier::new(500.0))), RATE, 20, 100)
    }

    /// Feeds `stream` in pieces of `piece` bytes and returns the byte offset
    /// at which the detector fired.
    fn trigger_offset(stream: &[u8], piece: usize) -> Option<usize> {
        let mut vad = detector();
        let mut fed = 0;
        for chunk in stream.chunks(piece) {
            fed += chunk.len();
            if vad.push(chunk) {
                return Some(fed);
            }
        }
        None
    }

    #[test]
    fn test_fires_after_threshold_of_silence() {
        let mut vad = detector();
        assert_eq!(vad.frame_bytes(), 640);
        assert!(!vad.push(&frame(4000)));
        for _ in 0..4 {
            assert!(!vad.push(&frame(0)));
        }
        assert_eq!(vad.silence_ms(), 80);
        assert!(vad.push(&frame(0)));
        // Stops after firing.
        assert!(!vad.push(&frame(0)));
    }

    #[test]
    fn test_speech_resets_silence() {
        let mut vad = detector();
        for _ in 0..4 {
            vad.push(&frame(0));
        }
        vad.push(&frame(3000));
        assert_eq!(vad.silence_ms(), 0);
        for _ in 0..4 {
            assert!(!vad.push(&frame(0)));
        }
        assert!(vad.push(&frame(0)));
    }

    #[test]
    fn test_trigger_is_independent_of_fragmentation() {
        let mut stream = Vec::new();
        for amplitude in [3000, 0, 0, 3000, 0, 0, 0, 0, 0, 0, 0] {
            stream.extend(frame(amplitude));
        }
        let whole = trigger_offset(&stream, stream.len());
        let expected_frames = 9;
        for piece in [2, 100, 640, 999, 1280, 4096] {
            let offset = trigger_offset(&stream, piece).expect("should trigger");
            // The firing frame ends somewhere inside the last piece fed.
            assert!(offset >= expected_frames * 640, "piece {piece}");
            assert!(offset < expected_frames * 640 + piece, "piece {piece}");
        }
        assert!(whole.is_some());
    }

    #[test]
    fn test_disabled_detector_never_fires() {
        let settings = VadSettings {
            mode: VadMode::Off,
            ..VadSettings::default()
        };
        let mut vad = VoiceActivityDetector::from_settings(&settings, RATE);
        assert!(!vad.is_enabled());
        for _ in 0..100 {
            assert!(!vad.push(&frame(0)));
        }
    }

    #[test]
    fn test_reset_rearms() {
        let mut vad = detector();
        for _ in 0..5 {
            vad.push(&frame(0));
        }
        vad.reset();
        assert_eq!(vad.silence_ms(), 0);
        for _ in 0..4 {
            assert!(!vad.push(&frame(0)));
        }
        assert!(vad.push(&frame(0)));
    }
}
