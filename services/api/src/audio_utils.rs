use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Bytes per mono s16le sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// RMS (on the i16 scale) at which the avatar's mouth is drawn fully open.
const MOUTH_FULL_OPEN_RMS: f32 = 8000.0;

const RESAMPLER_CHUNK: usize = 1024;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,                     // No cutoff frequency, pass all frequencies
        PolynomialDegree::Cubic, // Cubic interpolation for quality
        chunk_size,
        1, // 1 channel (mono)
    )?;
    Ok(resampler)
}

/// Resamples mono f32 audio. Returns the input unchanged when the rates match.
pub fn resample(samples: Vec<f32>, in_rate: u32, out_rate: u32) -> anyhow::Result<Vec<f32>> {
    if in_rate == out_rate || samples.is_empty() {
        return Ok(samples);
    }
    let mut resampler = create_resampler(in_rate as f64, out_rate as f64, RESAMPLER_CHUNK)?;
    let mut out = Vec::with_capacity(samples.len() * out_rate as usize / in_rate as usize + 1);
    let mut pos = 0;
    while pos + resampler.input_frames_next() <= samples.len() {
        let n = resampler.input_frames_next();
        let chunk = resampler.process(&[&samples[pos..pos + n]], None)?;
        out.extend_from_slice(&chunk[0]);
        pos += n;
    }
    if pos < samples.len() {
        let chunk = resampler.process_partial(Some(&[&samples[pos..]]), None)?;
        out.extend_from_slice(&chunk[0]);
    }
    Ok(out)
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Interprets little-endian bytes as i16 samples. A trailing odd byte is ignored.
pub fn bytes_to_i16(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(BYTES_PER_SAMPLE)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

pub fn i16_to_bytes(pcm16: &[i16]) -> Vec<u8> {
    pcm16.iter().flat_map(|sample| sample.to_le_bytes()).collect()
}

/// Root-mean-square of s16le PCM, on the i16 scale.
pub fn rms_i16(pcm: &[u8]) -> f32 {
    let samples = pcm.len() / BYTES_PER_SAMPLE;
    if samples == 0 {
        return 0.0;
    }
    let sum: f64 = pcm
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|chunk| {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]) as f64;
            v * v
        })
        .sum();
    (sum / samples as f64).sqrt() as f32
}

/// Coarse mouth openness in `[0, 1]` derived from chunk loudness.
pub fn mouth_openness(pcm: &[u8]) -> f32 {
    (rms_i16(pcm) / MOUTH_FULL_OPEN_RMS).clamp(0.0, 1.0)
}

/// Duration of mono s16le PCM in milliseconds.
pub fn pcm_duration_ms(byte_len: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (byte_len / BYTES_PER_SAMPLE) as u64 * 1000 / sample_rate as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_create_resampler() {
        // Test creating a resampler with valid parameters
        let result = create_resampler(16000.0, 24000.0, 1024);
        assert!(result.is_ok());

        // Test creating a resampler with downsampling
        let result = create_resampler(48000.0, 16000.0, 1024);
        assert!(result.is_ok());
    }

    #[test]
    fn test_resample_changes_length_by_ratio() {
        let input = vec![0.25f32; 4800];
        let output = resample(input, 48000, 16000).expect("resample");
        // Allow for the resampler's delay and the zero-padded final chunk.
        assert!((1400..=1800).contains(&output.len()), "got {}", output.len());

        let same = resample(vec![0.1, 0.2], 16000, 16000).expect("passthrough");
        assert_eq!(same, vec![0.1, 0.2]);
    }

    #[test]
    fn test_convert_f32_to_i16() {
        let input = vec![1.0f32, -1.0f32, 0.0f32, 0.5f32];
        let result = convert_f32_to_i16(&input);

        assert_eq!(result.len(), 4);
        assert_eq!(result[0], i16::MAX);
        // -1.0 * 32767 = -32767, not i16::MIN (-32768)
        assert_eq!(result[1], -32767);
        assert_eq!(result[2], 0);
        assert_eq!(result[3], (0.5 * i16::MAX as f32) as i16);

        // Test with values that need clamping
        let result = convert_f32_to_i16(&[2.0f32, -2.0f32]);
        assert_eq!(result[0], i16::MAX);
        assert_eq!(result[1], i16::MIN);
    }

    #[test]
    fn test_convert_i16_to_f32() {
        let input = vec![i16::MAX, i16::MIN, 0i16, 16384i16];
        let result = convert_i16_to_f32(&input);

        assert_eq!(result.len(), 4);
        assert_abs_diff_eq!(result[0], i16::MAX as f32 / 32768.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[1], -1.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[2], 0.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[3], 0.5, epsilon = 0.0001);
    }

    #[test]
    fn test_bytes_to_i16_ignores_odd_byte() {
        // 16384 in little endian, then a dangling byte
        assert_eq!(bytes_to_i16(&[0x00, 0x40, 0x01]), vec![16384]);
        assert_eq!(i16_to_bytes(&[16384, -1]), vec![0x00, 0x40, 0xff, 0xff]);
    }

    #[test]
    fn test_rms_of_constant_signal() {
        let pcm = i16_to_bytes(&[-3000, 3000, -3000, 3000]);
        assert_abs_diff_eq!(rms_i16(&pcm), 3000.0, epsilon = 0.01);
        assert_abs_diff_eq!(rms_i16(&[]), 0.0);
    }

    #[test]
    fn test_mouth_openness_is_clamped() {
        assert_abs_diff_eq!(mouth_openness(&[0u8; 64]), 0.0);
        let loud = i16_to_bytes(&[i16::MAX; 32]);
        assert_abs_diff_eq!(mouth_openness(&loud), 1.0);
        let half = i16_to_bytes(&[4000; 32]);
        assert_abs_diff_eq!(mouth_openness(&half), 0.5, epsilon = 0.001);
    }

    #[test]
    fn test_pcm_duration() {
        assert_eq!(pcm_duration_ms(32000, 16000), 1000);
        assert_eq!(pcm_duration_ms(640, 16000), 20);
        assert_eq!(pcm_duration_ms(640, 0), 0);
    }
}
