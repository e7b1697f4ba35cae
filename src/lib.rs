//! callscribe - Dual-channel live call transcription
//!
//! Captures a microphone and a system-loopback channel in parallel,
//! converts both to 16kHz mono PCM, and streams chunks into a speech
//! recognizer that emits partial and final transcription events.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod recognize;
pub mod testing;

// Core seams (backend → capture → recognize)
pub use device::{AudioBackend, DeviceDescriptor, DeviceRegistry, DeviceRole, StreamHandle};
pub use recognize::{EngineEvent, EngineSession, RecognizerEngine};

// Pipeline
pub use pipeline::{
    AudioLevel, ChannelId, EventKind, PipelineController, PipelineMetrics, PipelineState,
    TranscriptionEvent,
};

// Error handling
pub use error::{CallscribeError, Result};

// Config
pub use config::Config;

#[cfg(feature = "whisper")]
pub use recognize::whisper::{WhisperEngine, WhisperEngineConfig};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
