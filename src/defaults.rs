//! Default configuration constants for callscribe.
//!
//! These are shared across configuration types so every component agrees on
//! the pipeline's fixed-format contract.

use std::time::Duration;

/// Sample rate the recognizer consumes, in Hz.
///
/// 16kHz is the standard for speech recognition and provides a good balance
/// between quality and computational efficiency for voice applications.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Channel count the recognizer consumes (mono).
pub const TARGET_CHANNELS: u16 = 1;

/// Duration of one converted chunk in milliseconds.
///
/// 20ms at 16kHz is 320 samples, the atomic unit fed to the recognizer.
pub const CHUNK_DURATION_MS: u32 = 20;

/// Samples per converted chunk at the target rate.
pub const CHUNK_SAMPLES: usize = (TARGET_SAMPLE_RATE as usize * CHUNK_DURATION_MS as usize) / 1000;

/// Ring buffer capacity per channel, in chunks.
///
/// 16 chunks is 320ms of audio — enough to absorb consumer-side scheduling
/// jitter without materially increasing end-to-end latency.
pub const RING_CAPACITY_CHUNKS: usize = 16;

/// How long a consumer thread blocks on an empty ring before waking to check
/// shutdown flags and republish the latest level.
pub const POP_TIMEOUT: Duration = Duration::from_millis(100);

/// Grace period for `stop()`: per-channel workers that have not finished
/// finalizing by this deadline are abandoned.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Bounded subscriber queue for audio levels. Overflow drops the oldest
/// value; levels are superseded continuously so drops are harmless.
pub const LEVEL_QUEUE_CAPACITY: usize = 8;

/// Bounded subscriber queue for transcription events. Sized so that drops do
/// not occur under normal operation — losing transcript text is a
/// correctness defect, not a cosmetic one.
pub const TRANSCRIPT_QUEUE_CAPACITY: usize = 256;

/// How long a worker waits to hand a transcription event to a slow
/// subscriber before counting it as lost.
pub const TRANSCRIPT_SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// RMS of a full-scale sine wave (1/sqrt(2)); maps to a display level of 100.
pub const FULL_SCALE_RMS: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Number of level updates a peak value holds before it starts decaying.
pub const PEAK_HOLD_UPDATES: u32 = 15;

/// Display-scale units the peak decays per update once the hold expires.
pub const PEAK_DECAY_PER_UPDATE: f32 = 4.0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_samples_is_20ms_at_16khz() {
        assert_eq!(CHUNK_SAMPLES, 320);
    }

    #[test]
    fn ring_capacity_covers_scheduling_jitter() {
        let buffered_ms = RING_CAPACITY_CHUNKS as u32 * CHUNK_DURATION_MS;
        assert!(
            (200..=500).contains(&buffered_ms),
            "ring should hold a few hundred ms, holds {}ms",
            buffered_ms
        );
    }

    #[test]
    fn full_scale_rms_matches_sine() {
        assert!((FULL_SCALE_RMS - 0.7071).abs() < 1e-3);
    }
}
