use crate::defaults;
use crate::error::{CallscribeError, Result};
use crate::pipeline::types::ChannelId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub recognizer: RecognizerConfig,
    pub pipeline: PipelineConfig,
}

/// Capture and conversion configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Device id for the microphone channel; `None` picks the default.
    pub microphone_device: Option<String>,
    /// Device id for the loopback channel; `None` picks the default.
    pub loopback_device: Option<String>,
    pub target_sample_rate: u32,
    pub chunk_duration_ms: u32,
}

/// Speech recognizer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognizerConfig {
    pub model_path: Option<PathBuf>,
    pub language: String,
    /// Decode threads per session; 0 means one per available core.
    pub threads: usize,
}

/// Queueing and shutdown tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub ring_capacity_chunks: usize,
    pub shutdown_grace_ms: u64,
    pub transcript_queue: usize,
    pub level_queue: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            microphone_device: None,
            loopback_device: None,
            target_sample_rate: defaults::TARGET_SAMPLE_RATE,
            chunk_duration_ms: defaults::CHUNK_DURATION_MS,
        }
    }
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            language: "auto".to_string(),
            threads: 0,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ring_capacity_chunks: defaults::RING_CAPACITY_CHUNKS,
            shutdown_grace_ms: defaults::SHUTDOWN_GRACE.as_millis() as u64,
            transcript_queue: defaults::TRANSCRIPT_QUEUE_CAPACITY,
            level_queue: defaults::LEVEL_QUEUE_CAPACITY,
        }
    }
}

impl AudioConfig {
    /// Configured device preference for a channel, if any.
    pub fn preferred_device(&self, channel: ChannelId) -> Option<&str> {
        match channel {
            ChannelId::Microphone => self.microphone_device.as_deref(),
            ChannelId::Loopback => self.loopback_device.as_deref(),
        }
    }

    /// Samples per chunk at the target rate.
    pub fn chunk_samples(&self) -> usize {
        (self.target_sample_rate as usize * self.chunk_duration_ms as usize) / 1000
    }
}

impl PipelineConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CallscribeError::ConfigFileNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                CallscribeError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file does
    /// not exist. Invalid TOML and invalid values are still errors.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(CallscribeError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - CALLSCRIBE_MODEL → recognizer.model_path
    /// - CALLSCRIBE_LANGUAGE → recognizer.language
    /// - CALLSCRIBE_MIC_DEVICE → audio.microphone_device
    /// - CALLSCRIBE_LOOPBACK_DEVICE → audio.loopback_device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(model) = std::env::var("CALLSCRIBE_MODEL")
            && !model.is_empty()
        {
            self.recognizer.model_path = Some(PathBuf::from(model));
        }

        if let Ok(language) = std::env::var("CALLSCRIBE_LANGUAGE")
            && !language.is_empty()
        {
            self.recognizer.language = language;
        }

        if let Ok(device) = std::env::var("CALLSCRIBE_MIC_DEVICE")
            && !device.is_empty()
        {
            self.audio.microphone_device = Some(device);
        }

        if let Ok(device) = std::env::var("CALLSCRIBE_LOOPBACK_DEVICE")
            && !device.is_empty()
        {
            self.audio.loopback_device = Some(device);
        }

        self
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.audio.target_sample_rate == 0 {
            return Err(CallscribeError::ConfigInvalidValue {
                key: "audio.target_sample_rate".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.audio.chunk_duration_ms == 0 {
            return Err(CallscribeError::ConfigInvalidValue {
                key: "audio.chunk_duration_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.audio.chunk_samples() == 0 {
            return Err(CallscribeError::ConfigInvalidValue {
                key: "audio.chunk_duration_ms".to_string(),
                message: "chunk shorter than one sample at the target rate".to_string(),
            });
        }
        if self.pipeline.ring_capacity_chunks == 0 {
            return Err(CallscribeError::ConfigInvalidValue {
                key: "pipeline.ring_capacity_chunks".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.pipeline.transcript_queue == 0 || self.pipeline.level_queue == 0 {
            return Err(CallscribeError::ConfigInvalidValue {
                key: "pipeline.transcript_queue".to_string(),
                message: "queue capacities must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/callscribe/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("callscribe").join("config.toml"))
    }
}
