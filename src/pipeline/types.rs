//! Data types that flow out of the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Identifies which audio source a value came from.
///
/// The two channels are independently clocked streams; no cross-channel
/// ordering is defined between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelId {
    /// The local participant's microphone.
    Microphone,
    /// System/loopback audio carrying the remote participant.
    Loopback,
}

impl ChannelId {
    /// Both channels, in the order the controller starts them.
    pub const ALL: [ChannelId; 2] = [ChannelId::Microphone, ChannelId::Loopback];
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Microphone => write!(f, "microphone"),
            ChannelId::Loopback => write!(f, "loopback"),
        }
    }
}

/// Whether a recognition result is still in progress or complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// An in-progress hypothesis; may be revised by later events.
    Partial,
    /// A completed utterance; the text will not change.
    Final,
}

/// A recognition result emitted by one channel's recognizer session.
///
/// Immutable once emitted. `sequence` is strictly increasing per channel and
/// reflects delivery order, not recognition-completion order.
#[derive(Debug, Clone)]
pub struct TranscriptionEvent {
    pub channel: ChannelId,
    pub kind: EventKind,
    pub text: String,
    /// Engine confidence in [0.0, 1.0].
    pub confidence: f32,
    /// Capture time of the first chunk in this utterance.
    pub utterance_start: Instant,
    pub emitted_at: Instant,
    pub sequence: u64,
}

/// A smoothed amplitude reading for live visualization.
///
/// Recomputed continuously; superseded values are simply dropped.
#[derive(Debug, Clone, Copy)]
pub struct AudioLevel {
    pub channel: ChannelId,
    /// Instantaneous level on a 0–100 display scale.
    pub level: f32,
    /// Rolling peak on the same scale, decaying over a fixed window.
    pub peak: f32,
    pub timestamp: Instant,
}

/// A fixed-length block of target-format samples, the atomic unit handed to
/// the recognizer. Always exactly `ConversionConfig::chunk_samples` long;
/// partial chunks are never forwarded.
#[derive(Debug, Clone)]
pub struct ConvertedChunk {
    /// PCM samples (16-bit signed integers) at the target rate, mono.
    pub samples: Vec<i16>,
    /// Timestamp of the capture callback that completed this chunk.
    pub captured_at: Instant,
}

/// Overall pipeline state, owned exclusively by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Starting,
    Recording,
    Stopping,
    Failed(String),
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Stopped => write!(f, "stopped"),
            PipelineState::Starting => write!(f, "starting"),
            PipelineState::Recording => write!(f, "recording"),
            PipelineState::Stopping => write!(f, "stopping"),
            PipelineState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// A structured report of one channel's degraded or failed condition.
///
/// Consumers are expected to render partial service (one working channel)
/// rather than treat any single entry as total failure.
#[derive(Debug, Clone)]
pub struct ChannelProblem {
    pub channel: ChannelId,
    pub kind: ProblemKind,
    pub detail: String,
    pub occurred_at: Instant,
}

/// Classification of per-channel problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemKind {
    /// The native stream reported an error mid-capture.
    StreamError,
    /// The recognizer engine failed; the channel stopped emitting events.
    RecognizerFailed,
    /// The channel's worker did not finish finalizing within the grace
    /// period and was abandoned.
    ShutdownTimeout,
}

/// Counters for one channel, reported through [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelMetrics {
    /// Chunks overwritten in the ring because the consumer fell behind.
    pub dropped_chunks: u64,
    /// Samples clamped during quantization.
    pub clipped_samples: u64,
    /// Mean capture-to-feed latency over the session, in milliseconds.
    pub average_chunk_latency_ms: f64,
    /// Transcription events lost because a subscriber queue stayed full.
    pub lost_events: u64,
}

/// Aggregated diagnostics exposed by the control surface.
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub microphone: ChannelMetrics,
    pub loopback: ChannelMetrics,
    /// Recognizer feed/finalize failures across both channels.
    pub recognizer_error_count: u64,
}

impl PipelineMetrics {
    /// Returns the metrics for one channel.
    pub fn channel(&self, channel: ChannelId) -> &ChannelMetrics {
        match channel {
            ChannelId::Microphone => &self.microphone,
            ChannelId::Loopback => &self.loopback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_display() {
        assert_eq!(ChannelId::Microphone.to_string(), "microphone");
        assert_eq!(ChannelId::Loopback.to_string(), "loopback");
    }

    #[test]
    fn pipeline_state_display_includes_failure_reason() {
        let state = PipelineState::Failed("all channels down".to_string());
        assert_eq!(state.to_string(), "failed: all channels down");
    }

    #[test]
    fn metrics_channel_lookup() {
        let mut metrics = PipelineMetrics::default();
        metrics.loopback.dropped_chunks = 7;
        assert_eq!(metrics.channel(ChannelId::Loopback).dropped_chunks, 7);
        assert_eq!(metrics.channel(ChannelId::Microphone).dropped_chunks, 0);
    }

    #[test]
    fn channel_id_serializes_lowercase() {
        let json = serde_json::to_string(&ChannelId::Loopback).unwrap();
        assert_eq!(json, "\"loopback\"");
    }
}
