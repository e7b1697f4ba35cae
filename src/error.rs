//! Error types for callscribe.

use crate::pipeline::types::ChannelId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CallscribeError {
    // Configuration errors
    #[error("Configuration file not found at {}", path.display())]
    ConfigFileNotFound { path: std::path::PathBuf },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Device and capture errors — fatal at start(), never raised mid-stream
    #[error("No {role} device available")]
    DeviceNotFound { role: String },

    #[error("Failed to open stream on {device}: {message}")]
    StreamOpenFailed { device: String, message: String },

    #[error("Invalid conversion config: {message}")]
    InvalidConversionConfig { message: String },

    // Recognizer errors
    #[error("Recognizer initialization failed: {message}")]
    RecognizerInitFailed { message: String },

    #[error("Recognizer failed on {channel} channel: {message}")]
    RecognizerRuntime {
        channel: ChannelId,
        message: String,
    },

    #[error("Recognizer model not found at {path}")]
    RecognizerModelNotFound { path: String },

    // Shutdown errors — per-channel, isolable
    #[error("Shutdown timed out waiting for {channel} channel")]
    ShutdownTimeout { channel: ChannelId },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, CallscribeError>;
