//! Recognizer engine capability interface.
//!
//! The speech-recognition engine is an opaque, possibly-stateful,
//! possibly-fallible collaborator. It may return zero events for many
//! consecutive chunks (silence) and bursts of several events for one chunk
//! (end of utterance). Concrete implementations are selected at
//! configuration time rather than branched on throughout the pipeline.

use crate::error::Result;
use crate::pipeline::types::EventKind;

/// A raw recognition result as produced by an engine, before the pipeline
/// stamps it with channel, sequence, and timing.
#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub kind: EventKind,
    pub text: String,
    /// Engine confidence in [0.0, 1.0].
    pub confidence: f32,
}

/// Factory for per-channel engine sessions.
pub trait RecognizerEngine: Send + Sync {
    /// Human-readable engine name, for logs and diagnostics.
    fn name(&self) -> &str;

    /// Creates one recognition session consuming PCM16 audio at the given
    /// format. Each pipeline channel gets its own session.
    ///
    /// # Errors
    /// `RecognizerInitFailed` when the engine cannot start (missing model,
    /// unsupported format).
    fn create_session(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn EngineSession>>;
}

/// One live recognition stream. Dropped to destroy.
pub trait EngineSession: Send {
    /// Consumes one fixed-size chunk, returning zero or more events.
    fn feed(&mut self, pcm: &[i16]) -> Result<Vec<EngineEvent>>;

    /// Flushes any pending utterance into final events. Called once when
    /// the session is stopping.
    fn finalize(&mut self) -> Result<Vec<EngineEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptStep, ScriptedEngine};

    #[test]
    fn engine_trait_is_object_safe() {
        let engine: Box<dyn RecognizerEngine> = Box::new(ScriptedEngine::silent());
        assert_eq!(engine.name(), "scripted");
        let mut session = engine.create_session(16_000, 1).unwrap();
        assert!(session.feed(&[0; 320]).unwrap().is_empty());
        assert!(session.finalize().unwrap().is_empty());
    }

    #[test]
    fn silence_yields_no_events_indefinitely() {
        let engine = ScriptedEngine::silent();
        let mut session = engine.create_session(16_000, 1).unwrap();
        for _ in 0..250 {
            assert!(session.feed(&[0; 320]).unwrap().is_empty());
        }
    }

    #[test]
    fn burst_of_events_for_one_chunk() {
        // Partial immediately followed by final models end-of-utterance
        let engine = ScriptedEngine::new(vec![
            ScriptStep::Partial("so"),
            ScriptStep::Final("so that works"),
        ]);
        let mut session = engine.create_session(16_000, 1).unwrap();

        let first = session.feed(&[0; 320]).unwrap();
        assert_eq!(first[0].kind, EventKind::Partial);
        let second = session.feed(&[0; 320]).unwrap();
        assert_eq!(second[0].kind, EventKind::Final);
        assert_eq!(second[0].text, "so that works");
    }
}
