//! Conversion of native-format capture blocks into recognizer chunks.
//!
//! Transforms interleaved native samples into 16kHz mono PCM16 in four
//! steps, each independently testable: channel mixdown, integer-ratio
//! decimation with a moving-average anti-aliasing filter, quantization with
//! clip protection, and fixed-size chunk segmentation with carry.
//!
//! Runs inside the capture callback, so per-block conversion never fails:
//! numeric edge cases are clamped, not raised. All validation happens once
//! in [`ConversionConfig::new`] at session start.

use crate::defaults;
use crate::error::{CallscribeError, Result};
use crate::pipeline::types::ConvertedChunk;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Fixed conversion parameters for one capture session.
///
/// Computed once at session start and immutable for the session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionConfig {
    pub source_sample_rate: u32,
    pub source_channels: u16,
    pub target_sample_rate: u32,
    pub target_channels: u16,
    /// Samples per emitted chunk at the target rate.
    pub chunk_samples: usize,
}

impl ConversionConfig {
    /// Validates and builds a conversion config for a native source format.
    ///
    /// # Errors
    /// Returns `InvalidConversionConfig` when the target rate is zero, the
    /// source has no channels, or the source rate is not an integer multiple
    /// of the target rate (non-integer decimation is rejected rather than
    /// silently mis-converted).
    pub fn new(source_sample_rate: u32, source_channels: u16) -> Result<Self> {
        Self::with_target(
            source_sample_rate,
            source_channels,
            defaults::TARGET_SAMPLE_RATE,
            defaults::CHUNK_SAMPLES,
        )
    }

    /// Builds a config with a non-default target rate and chunk size.
    pub fn with_target(
        source_sample_rate: u32,
        source_channels: u16,
        target_sample_rate: u32,
        chunk_samples: usize,
    ) -> Result<Self> {
        if target_sample_rate == 0 {
            return Err(CallscribeError::InvalidConversionConfig {
                message: "target sample rate must be non-zero".to_string(),
            });
        }
        if source_channels == 0 {
            return Err(CallscribeError::InvalidConversionConfig {
                message: "source must have at least one channel".to_string(),
            });
        }
        if chunk_samples == 0 {
            return Err(CallscribeError::InvalidConversionConfig {
                message: "chunk size must be non-zero".to_string(),
            });
        }
        if source_sample_rate < target_sample_rate {
            return Err(CallscribeError::InvalidConversionConfig {
                message: format!(
                    "upsampling from {}Hz to {}Hz is not supported",
                    source_sample_rate, target_sample_rate
                ),
            });
        }
        if source_sample_rate % target_sample_rate != 0 {
            return Err(CallscribeError::InvalidConversionConfig {
                message: format!(
                    "{}Hz is not an integer multiple of {}Hz",
                    source_sample_rate, target_sample_rate
                ),
            });
        }

        Ok(Self {
            source_sample_rate,
            source_channels,
            target_sample_rate,
            target_channels: defaults::TARGET_CHANNELS,
            chunk_samples,
        })
    }

    /// Source samples consumed per output sample.
    pub fn decimation_factor(&self) -> usize {
        (self.source_sample_rate / self.target_sample_rate) as usize
    }
}

/// Stateful converter: native interleaved blocks in, fixed-size PCM16
/// chunks out.
///
/// Carries two remainders across calls — source samples that did not fill a
/// decimation window, and converted samples that did not fill a chunk — so
/// irregular callback block sizes still yield exact-size chunks.
pub struct FormatConverter {
    config: ConversionConfig,
    /// Mono samples awaiting a full decimation window.
    decim_carry: Vec<f32>,
    /// Converted samples awaiting a full chunk.
    chunk_carry: Vec<i16>,
    clipped: Arc<AtomicU64>,
}

impl FormatConverter {
    /// Creates a converter for a validated config.
    pub fn new(config: ConversionConfig) -> Self {
        Self {
            config,
            decim_carry: Vec::with_capacity(config.decimation_factor() * 2),
            chunk_carry: Vec::with_capacity(config.chunk_samples),
            clipped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Shared handle to the clipped-sample counter, for metrics reporting.
    pub fn clipped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.clipped)
    }

    /// Samples clamped during quantization so far.
    pub fn clipped_samples(&self) -> u64 {
        self.clipped.load(Ordering::Relaxed)
    }

    /// Converts one native block, returning zero or more complete chunks.
    ///
    /// Deterministic: the same block sequence through the same config yields
    /// identical output. Never fails; out-of-range samples are clamped and
    /// counted.
    pub fn convert(&mut self, block: &[f32], captured_at: Instant) -> Vec<ConvertedChunk> {
        let channels = self.config.source_channels as usize;
        let factor = self.config.decimation_factor();

        // Step 1: equal-weight mixdown to mono. Averaging can never clip:
        // the mean of values in [-1, 1] stays in [-1, 1].
        for frame in block.chunks_exact(channels) {
            let sum: f32 = frame.iter().sum();
            self.decim_carry.push(sum / channels as f32);
        }

        // Step 2: decimation with anti-aliasing. Each disjoint window of
        // `factor` samples is averaged (the moving-average low-pass evaluated
        // at every Nth position); the window mean becomes the output sample.
        // Step 3: quantize to i16 with hard clamping.
        let full_windows = self.decim_carry.len() / factor;
        for w in 0..full_windows {
            let window = &self.decim_carry[w * factor..(w + 1) * factor];
            let mean: f32 = window.iter().sum::<f32>() / factor as f32;
            let quantized = quantize(mean, &self.clipped);
            self.chunk_carry.push(quantized);
        }
        self.decim_carry.drain(..full_windows * factor);

        // Step 4: segment into fixed-size chunks, retaining the remainder.
        let mut chunks = Vec::new();
        while self.chunk_carry.len() >= self.config.chunk_samples {
            let samples: Vec<i16> = self
                .chunk_carry
                .drain(..self.config.chunk_samples)
                .collect();
            chunks.push(ConvertedChunk {
                samples,
                captured_at,
            });
        }
        chunks
    }

    /// Number of converted samples currently held back waiting for a full
    /// chunk.
    pub fn pending_samples(&self) -> usize {
        self.chunk_carry.len()
    }
}

/// Maps a float sample in [-1.0, 1.0] onto the i16 range with rounding and
/// clip counting.
fn quantize(sample: f32, clipped: &AtomicU64) -> i16 {
    if !(-1.0..=1.0).contains(&sample) {
        clipped.fetch_add(1, Ordering::Relaxed);
    }
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_48k_stereo() -> ConversionConfig {
        ConversionConfig::new(48_000, 2).unwrap()
    }

    #[test]
    fn rejects_non_integer_ratio() {
        let err = ConversionConfig::new(44_100, 2).unwrap_err();
        match err {
            CallscribeError::InvalidConversionConfig { message } => {
                assert!(message.contains("44100Hz"), "got: {}", message);
            }
            other => panic!("expected InvalidConversionConfig, got {:?}", other),
        }
    }

    #[test]
    fn rejects_zero_target_rate() {
        assert!(ConversionConfig::with_target(48_000, 2, 0, 320).is_err());
    }

    #[test]
    fn rejects_zero_channels() {
        assert!(ConversionConfig::new(48_000, 0).is_err());
    }

    #[test]
    fn rejects_upsampling() {
        assert!(ConversionConfig::new(8_000, 1).is_err());
    }

    #[test]
    fn accepts_native_target_rate() {
        let config = ConversionConfig::new(16_000, 1).unwrap();
        assert_eq!(config.decimation_factor(), 1);
    }

    #[test]
    fn decimation_factor_48k_to_16k() {
        assert_eq!(config_48k_stereo().decimation_factor(), 3);
    }

    #[test]
    fn emits_only_full_chunks() {
        let mut converter = FormatConverter::new(config_48k_stereo());
        let now = Instant::now();

        // 960 stereo frames at 48kHz → 320 output samples → exactly 1 chunk
        let block = vec![0.1f32; 960 * 2];
        let chunks = converter.convert(&block, now);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].samples.len(), defaults::CHUNK_SAMPLES);
        assert_eq!(converter.pending_samples(), 0);
    }

    #[test]
    fn carries_remainder_across_calls() {
        let mut converter = FormatConverter::new(config_48k_stereo());
        let now = Instant::now();

        // 480 stereo frames → 160 output samples: half a chunk, held back
        let half = vec![0.1f32; 480 * 2];
        assert!(converter.convert(&half, now).is_empty());
        assert_eq!(converter.pending_samples(), 160);

        // Second half completes the chunk
        let chunks = converter.convert(&half, now);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].samples.len(), defaults::CHUNK_SAMPLES);
    }

    #[test]
    fn irregular_block_sizes_never_yield_short_chunks() {
        let mut converter = FormatConverter::new(config_48k_stereo());
        let now = Instant::now();

        // Prime-ish block sizes exercise both carries
        let mut total_chunks = 0;
        for size in [7, 123, 1001, 333, 4096, 1, 977] {
            let block = vec![0.05f32; size * 2];
            for chunk in converter.convert(&block, now) {
                assert_eq!(chunk.samples.len(), defaults::CHUNK_SAMPLES);
                total_chunks += 1;
            }
        }
        // (7+123+1001+333+4096+1+977) frames / 3 = 2179 samples → 6 chunks
        assert_eq!(total_chunks, 6);
    }

    #[test]
    fn conversion_is_deterministic() {
        let block: Vec<f32> = (0..960 * 2)
            .map(|i| ((i as f32) * 0.01).sin() * 0.8)
            .collect();
        let now = Instant::now();

        let mut a = FormatConverter::new(config_48k_stereo());
        let mut b = FormatConverter::new(config_48k_stereo());
        let chunks_a = a.convert(&block, now);
        let chunks_b = b.convert(&block, now);

        assert_eq!(chunks_a.len(), chunks_b.len());
        for (ca, cb) in chunks_a.iter().zip(&chunks_b) {
            assert_eq!(ca.samples, cb.samples);
        }
    }

    #[test]
    fn mixdown_averages_channels() {
        // Mono 16kHz config so mixdown is the only transformation
        let config = ConversionConfig::with_target(16_000, 2, 16_000, 4).unwrap();
        let mut converter = FormatConverter::new(config);

        // Left 1.0, right 0.0 → mono 0.5 → quantized i16::MAX/2 (rounded)
        let block = [1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        let chunks = converter.convert(&block, Instant::now());
        assert_eq!(chunks.len(), 1);
        let expected = (0.5f32 * i16::MAX as f32).round() as i16;
        assert!(chunks[0].samples.iter().all(|&s| s == expected));
    }

    #[test]
    fn full_scale_sine_never_leaves_representable_range() {
        let mut converter = FormatConverter::new(config_48k_stereo());
        let now = Instant::now();

        // 1kHz full-scale sine, interleaved stereo, 48kHz, one second
        let block: Vec<f32> = (0..48_000)
            .flat_map(|i| {
                let s = (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 48_000.0).sin();
                [s, s]
            })
            .collect();

        let chunks = converter.convert(&block, now);
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            for &s in &chunk.samples {
                assert!((i16::MIN..=i16::MAX).contains(&s));
            }
        }
        // In-range input is not counted as clipping
        assert_eq!(converter.clipped_samples(), 0);
    }

    #[test]
    fn out_of_range_samples_are_clamped_and_counted() {
        let config = ConversionConfig::with_target(16_000, 1, 16_000, 4).unwrap();
        let mut converter = FormatConverter::new(config);

        let block = [2.0, -3.0, 0.5, 1.5];
        let chunks = converter.convert(&block, Instant::now());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].samples[0], i16::MAX);
        assert_eq!(chunks[0].samples[1], -i16::MAX);
        assert_eq!(converter.clipped_samples(), 3);
    }

    #[test]
    fn decimation_averages_windows() {
        // Mono 48k→16k, chunk of 2: windows of 3 are averaged
        let config = ConversionConfig::with_target(48_000, 1, 16_000, 2).unwrap();
        let mut converter = FormatConverter::new(config);

        let block = [0.0, 0.3, 0.6, 0.9, 0.9, 0.9];
        let chunks = converter.convert(&block, Instant::now());
        assert_eq!(chunks.len(), 1);
        let first = (0.3f32 * i16::MAX as f32).round() as i16;
        let second = (0.9f32 * i16::MAX as f32).round() as i16;
        assert_eq!(chunks[0].samples, vec![first, second]);
    }
}
