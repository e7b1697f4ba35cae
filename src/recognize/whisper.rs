//! Whisper-backed recognizer engine.
//!
//! whisper-rs transcribes whole buffers, so each session accumulates chunks
//! and runs inference at two points: periodically while speech is present
//! (emitting partial hypotheses) and after a run of trailing silence or an
//! explicit finalize (emitting the final result and resetting the
//! utterance buffer).
//!
//! # Feature Gate
//!
//! Requires the `whisper` feature and cmake to build:
//!
//! ```bash
//! cargo build --features whisper
//! ```

use crate::defaults;
use crate::error::{CallscribeError, Result};
use crate::pipeline::types::EventKind;
use crate::recognize::engine::{EngineEvent, EngineSession, RecognizerEngine};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Once};
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters,
    install_logging_hooks,
};

static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Language value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// RMS threshold separating speech from ambient noise on the PCM16 stream.
const SPEECH_RMS_THRESHOLD: f32 = 0.02;

/// Trailing silence that ends an utterance, in milliseconds.
const FINALIZE_AFTER_SILENCE_MS: u32 = 800;

/// How often to emit a partial hypothesis while speech continues.
const PARTIAL_INTERVAL_MS: u32 = 1000;

/// Leading-context chunks kept while waiting for speech to start.
const PRE_SPEECH_CHUNKS: usize = 10;

/// Configuration for the Whisper engine.
#[derive(Debug, Clone)]
pub struct WhisperEngineConfig {
    /// Path to the ggml model file.
    pub model_path: PathBuf,
    /// Language code, or [`AUTO_LANGUAGE`] for detection.
    pub language: String,
    /// Inference threads (None = whisper.cpp default).
    pub threads: Option<usize>,
}

impl Default for WhisperEngineConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/ggml-base.bin"),
            language: AUTO_LANGUAGE.to_string(),
            threads: None,
        }
    }
}

/// [`RecognizerEngine`] sharing one Whisper model across channel sessions.
pub struct WhisperEngine {
    context: Arc<Mutex<WhisperContext>>,
    config: WhisperEngineConfig,
    model_name: String,
}

impl WhisperEngine {
    /// Loads the model once; sessions share the context and create their own
    /// inference state per run.
    ///
    /// # Errors
    /// `RecognizerModelNotFound` when the model file is missing,
    /// `RecognizerInitFailed` when whisper.cpp rejects it.
    pub fn new(config: WhisperEngineConfig) -> Result<Self> {
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !config.model_path.exists() {
            return Err(CallscribeError::RecognizerModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }

        let model_name = config
            .model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let context_params = WhisperContextParameters::default();
        let context = WhisperContext::new_with_params(
            config
                .model_path
                .to_str()
                .ok_or_else(|| CallscribeError::RecognizerInitFailed {
                    message: "invalid UTF-8 in model path".to_string(),
                })?,
            context_params,
        )
        .map_err(|e| CallscribeError::RecognizerInitFailed {
            message: format!("failed to load Whisper model: {}", e),
        })?;

        Ok(Self {
            context: Arc::new(Mutex::new(context)),
            config,
            model_name,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl RecognizerEngine for WhisperEngine {
    fn name(&self) -> &str {
        "whisper"
    }

    fn create_session(&self, sample_rate: u32, _channels: u16) -> Result<Box<dyn EngineSession>> {
        if sample_rate != defaults::TARGET_SAMPLE_RATE {
            return Err(CallscribeError::RecognizerInitFailed {
                message: format!(
                    "whisper sessions require {}Hz input, got {}Hz",
                    defaults::TARGET_SAMPLE_RATE,
                    sample_rate
                ),
            });
        }
        Ok(Box::new(WhisperSession {
            context: Arc::clone(&self.context),
            language: self.config.language.clone(),
            threads: self.config.threads,
            sample_rate,
            buffer: Vec::new(),
            in_speech: false,
            silence_ms: 0,
            ms_since_partial: 0,
            last_partial: String::new(),
        }))
    }
}

struct WhisperSession {
    context: Arc<Mutex<WhisperContext>>,
    language: String,
    threads: Option<usize>,
    sample_rate: u32,
    /// Accumulated utterance audio, normalized to [-1.0, 1.0].
    buffer: Vec<f32>,
    in_speech: bool,
    silence_ms: u32,
    ms_since_partial: u32,
    last_partial: String,
}

impl WhisperSession {
    fn chunk_ms(&self, samples: usize) -> u32 {
        (samples as u32 * 1000) / self.sample_rate
    }

    /// Runs inference over the accumulated utterance buffer.
    fn transcribe(&self) -> Result<(String, f32)> {
        let context = self
            .context
            .lock()
            .map_err(|e| CallscribeError::Other(format!("whisper context poisoned: {}", e)))?;

        let mut state = context
            .create_state()
            .map_err(|e| CallscribeError::Other(format!("failed to create Whisper state: {}", e)))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        if self.language == AUTO_LANGUAGE {
            params.set_language(None);
        } else {
            params.set_language(Some(&self.language));
        }
        if let Some(threads) = self.threads {
            params.set_n_threads(threads as i32);
        }
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &self.buffer)
            .map_err(|e| CallscribeError::Other(format!("Whisper inference failed: {}", e)))?;

        let mut text = String::new();
        let mut confidence_sum = 0.0_f32;
        let mut segment_count = 0u32;
        for segment in state.as_iter() {
            text.push_str(&segment.to_string());
            // no_speech_probability is 0.0..1.0; confidence = 1 - no_speech_prob
            confidence_sum += 1.0 - segment.no_speech_probability();
            segment_count += 1;
        }

        let confidence = if segment_count > 0 {
            (confidence_sum / segment_count as f32).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Ok((text.trim().to_string(), confidence))
    }

    fn emit_final(&mut self) -> Result<Vec<EngineEvent>> {
        let result = self.transcribe();
        self.buffer.clear();
        self.in_speech = false;
        self.silence_ms = 0;
        self.ms_since_partial = 0;
        self.last_partial.clear();

        let (text, confidence) = result?;
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![EngineEvent {
            kind: EventKind::Final,
            text,
            confidence,
        }])
    }
}

impl EngineSession for WhisperSession {
    fn feed(&mut self, pcm: &[i16]) -> Result<Vec<EngineEvent>> {
        let chunk_ms = self.chunk_ms(pcm.len());

        let sum_squares: f32 = pcm
            .iter()
            .map(|&s| {
                let f = s as f32 / 32_768.0;
                f * f
            })
            .sum();
        let rms = if pcm.is_empty() {
            0.0
        } else {
            (sum_squares / pcm.len() as f32).sqrt()
        };

        self.buffer.extend(pcm.iter().map(|&s| s as f32 / 32_768.0));

        if rms >= SPEECH_RMS_THRESHOLD {
            self.in_speech = true;
            self.silence_ms = 0;
        } else if self.in_speech {
            self.silence_ms += chunk_ms;
        } else {
            // Waiting for speech: keep a short pre-roll, drop older silence
            let max_samples = PRE_SPEECH_CHUNKS * pcm.len().max(1);
            if self.buffer.len() > max_samples {
                let excess = self.buffer.len() - max_samples;
                self.buffer.drain(..excess);
            }
            return Ok(Vec::new());
        }

        if self.in_speech && self.silence_ms >= FINALIZE_AFTER_SILENCE_MS {
            return self.emit_final();
        }

        self.ms_since_partial += chunk_ms;
        if self.in_speech && self.ms_since_partial >= PARTIAL_INTERVAL_MS {
            self.ms_since_partial = 0;
            let (text, confidence) = self.transcribe()?;
            // Duplicate partials carry no information; skip them
            if !text.is_empty() && text != self.last_partial {
                self.last_partial = text.clone();
                return Ok(vec![EngineEvent {
                    kind: EventKind::Partial,
                    text,
                    confidence,
                }]);
            }
        }

        Ok(Vec::new())
    }

    fn finalize(&mut self) -> Result<Vec<EngineEvent>> {
        if !self.in_speech && self.buffer.is_empty() {
            return Ok(Vec::new());
        }
        if !self.in_speech {
            // Only pre-roll silence buffered; nothing to flush
            self.buffer.clear();
            return Ok(Vec::new());
        }
        self.emit_final()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_uses_auto_language() {
        let config = WhisperEngineConfig::default();
        assert_eq!(config.language, AUTO_LANGUAGE);
        assert_eq!(config.model_path, PathBuf::from("models/ggml-base.bin"));
        assert!(config.threads.is_none());
    }

    #[test]
    fn missing_model_fails_at_init() {
        let config = WhisperEngineConfig {
            model_path: PathBuf::from("/nonexistent/model.bin"),
            ..Default::default()
        };
        match WhisperEngine::new(config) {
            Err(CallscribeError::RecognizerModelNotFound { path }) => {
                assert!(path.contains("nonexistent"));
            }
            other => panic!("expected RecognizerModelNotFound, got {:?}", other.err()),
        }
    }
}
