//! High-rate amplitude metering, independent of the recognition path.
//!
//! The capture callback computes an RMS-based display level per block and
//! overwrites a single-slot cell. A slow consumer can never cause
//! backpressure on capture: superseded values are simply lost.

use crate::defaults;
use crate::pipeline::types::{AudioLevel, ChannelId};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Computes a smoothed 0–100 display level with a decaying rolling peak.
///
/// Stateful: the peak holds the recent maximum for a fixed number of updates
/// and then decays linearly toward the instantaneous level.
pub struct LevelMonitor {
    channel: ChannelId,
    peak: f32,
    updates_since_peak: u32,
    cell: Arc<LevelCell>,
}

impl LevelMonitor {
    /// Creates a monitor publishing into the given cell.
    pub fn new(channel: ChannelId, cell: Arc<LevelCell>) -> Self {
        Self {
            channel,
            peak: 0.0,
            updates_since_peak: 0,
            cell,
        }
    }

    /// Processes one raw block and publishes the updated reading.
    ///
    /// Called from the capture callback; does one RMS pass and one short
    /// mutex write, nothing else.
    pub fn update(&mut self, block: &[f32]) {
        let level = display_level(rms(block));

        if level >= self.peak {
            self.peak = level;
            self.updates_since_peak = 0;
        } else {
            self.updates_since_peak += 1;
            if self.updates_since_peak > defaults::PEAK_HOLD_UPDATES {
                self.peak = (self.peak - defaults::PEAK_DECAY_PER_UPDATE).max(level);
            }
        }

        self.cell.store(AudioLevel {
            channel: self.channel,
            level,
            peak: self.peak,
            timestamp: Instant::now(),
        });
    }

    /// Current peak on the display scale.
    pub fn peak(&self) -> f32 {
        self.peak
    }
}

/// Single-slot "latest value" cell shared between the capture callback and
/// one consumer.
///
/// Overwrite semantics, no queue. The critical section is a single copy of
/// a small Copy struct, bounded independently of consumer behavior.
#[derive(Default)]
pub struct LevelCell {
    slot: Mutex<Option<AudioLevel>>,
}

impl LevelCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored reading.
    pub fn store(&self, level: AudioLevel) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(level);
        }
    }

    /// Takes the latest reading, leaving the slot empty.
    ///
    /// Returns `None` when no new reading arrived since the last take.
    pub fn take(&self) -> Option<AudioLevel> {
        self.slot.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Root-mean-square amplitude of a sample block.
fn rms(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = block.iter().map(|&s| s * s).sum();
    (sum_squares / block.len() as f32).sqrt()
}

/// Maps an RMS amplitude onto the bounded 0–100 display scale.
///
/// A full-scale sine (RMS 1/sqrt(2)) maps to 100; anything hotter clamps.
fn display_level(rms: f32) -> f32 {
    (rms / defaults::FULL_SCALE_RMS * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine_block(amplitude: f32, samples: usize) -> Vec<f32> {
        (0..samples)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * i as f32 / 64.0).sin())
            .collect()
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms(&[0.0; 256]), 0.0);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn rms_of_full_scale_sine() {
        // Whole periods of a unit sine have RMS 1/sqrt(2)
        let block = sine_block(1.0, 640);
        assert_relative_eq!(rms(&block), defaults::FULL_SCALE_RMS, epsilon = 1e-3);
    }

    #[test]
    fn display_level_is_bounded() {
        assert_eq!(display_level(0.0), 0.0);
        assert_relative_eq!(display_level(defaults::FULL_SCALE_RMS), 100.0, epsilon = 1e-3);
        // Hotter than full scale clamps rather than overflowing the scale
        assert_eq!(display_level(5.0), 100.0);
    }

    #[test]
    fn monitor_publishes_latest_reading() {
        let cell = Arc::new(LevelCell::new());
        let mut monitor = LevelMonitor::new(ChannelId::Microphone, Arc::clone(&cell));

        monitor.update(&sine_block(0.5, 640));
        let reading = cell.take().expect("reading published");
        assert_eq!(reading.channel, ChannelId::Microphone);
        assert!(reading.level > 0.0 && reading.level <= 100.0);

        // Slot empties after take
        assert!(cell.take().is_none());
    }

    #[test]
    fn overwrite_keeps_only_latest() {
        let cell = Arc::new(LevelCell::new());
        let mut monitor = LevelMonitor::new(ChannelId::Loopback, Arc::clone(&cell));

        monitor.update(&sine_block(1.0, 640));
        monitor.update(&[0.0; 640]);

        let reading = cell.take().expect("reading published");
        assert_relative_eq!(reading.level, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn peak_holds_then_decays() {
        let cell = Arc::new(LevelCell::new());
        let mut monitor = LevelMonitor::new(ChannelId::Microphone, Arc::clone(&cell));

        monitor.update(&sine_block(1.0, 640));
        let peak_at_max = monitor.peak();
        assert_relative_eq!(peak_at_max, 100.0, epsilon = 1.0);

        // Within the hold window the peak stays put
        for _ in 0..defaults::PEAK_HOLD_UPDATES {
            monitor.update(&[0.0; 640]);
        }
        assert_relative_eq!(monitor.peak(), peak_at_max, epsilon = 1e-3);

        // After the hold it decays by a fixed step per update
        monitor.update(&[0.0; 640]);
        assert_relative_eq!(
            monitor.peak(),
            peak_at_max - defaults::PEAK_DECAY_PER_UPDATE,
            epsilon = 1e-3
        );

        // And eventually reaches the floor
        for _ in 0..100 {
            monitor.update(&[0.0; 640]);
        }
        assert_relative_eq!(monitor.peak(), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn silence_reads_near_zero() {
        let cell = Arc::new(LevelCell::new());
        let mut monitor = LevelMonitor::new(ChannelId::Microphone, Arc::clone(&cell));

        monitor.update(&[0.0001; 640]);
        let reading = cell.take().expect("reading published");
        assert!(reading.level < 1.0, "got level {}", reading.level);
    }
}
