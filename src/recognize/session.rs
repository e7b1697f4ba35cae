//! Recognizer session: one engine session bound to one pipeline channel.
//!
//! Stamps engine output with channel identity, utterance timing, and
//! monotonically increasing sequence numbers. Sequence numbers are assigned
//! on emission, not on recognition completion, so delivery order holds even
//! if the engine reorders internally. Engine failures are caught here and
//! translated into per-channel errors the controller can isolate.

use crate::error::{CallscribeError, Result};
use crate::pipeline::types::{ChannelId, ConvertedChunk, EventKind, TranscriptionEvent};
use crate::recognize::engine::{EngineEvent, EngineSession};
use std::time::Instant;

/// Wraps exactly one engine session for one channel.
pub struct RecognizerSession {
    channel: ChannelId,
    engine_session: Box<dyn EngineSession>,
    sequence: u64,
    /// Capture time of the first chunk fed since the last final event.
    utterance_start: Option<Instant>,
    error_count: u64,
}

impl RecognizerSession {
    pub fn new(channel: ChannelId, engine_session: Box<dyn EngineSession>) -> Self {
        Self {
            channel,
            engine_session,
            sequence: 0,
            utterance_start: None,
            error_count: 0,
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Feed/finalize failures observed so far.
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Feeds one fixed-size chunk, returning stamped events in delivery
    /// order.
    ///
    /// # Errors
    /// `RecognizerRuntime` naming this channel when the engine fails; the
    /// caller decides whether to restart the channel.
    pub fn feed(&mut self, chunk: &ConvertedChunk) -> Result<Vec<TranscriptionEvent>> {
        if self.utterance_start.is_none() {
            self.utterance_start = Some(chunk.captured_at);
        }

        let raw = self.engine_session.feed(&chunk.samples).map_err(|e| {
            self.error_count += 1;
            CallscribeError::RecognizerRuntime {
                channel: self.channel,
                message: e.to_string(),
            }
        })?;

        Ok(self.stamp(raw))
    }

    /// Flushes the engine's pending utterance into final events.
    pub fn finalize(&mut self) -> Result<Vec<TranscriptionEvent>> {
        let raw = self.engine_session.finalize().map_err(|e| {
            self.error_count += 1;
            CallscribeError::RecognizerRuntime {
                channel: self.channel,
                message: e.to_string(),
            }
        })?;
        Ok(self.stamp(raw))
    }

    fn stamp(&mut self, raw: Vec<EngineEvent>) -> Vec<TranscriptionEvent> {
        let mut events = Vec::with_capacity(raw.len());
        for event in raw {
            let utterance_start = self.utterance_start.unwrap_or_else(Instant::now);
            let stamped = TranscriptionEvent {
                channel: self.channel,
                kind: event.kind,
                text: event.text,
                confidence: event.confidence.clamp(0.0, 1.0),
                utterance_start,
                emitted_at: Instant::now(),
                sequence: self.sequence,
            };
            self.sequence += 1;
            if stamped.kind == EventKind::Final {
                // Next chunk begins a new utterance
                self.utterance_start = None;
            }
            events.push(stamped);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognize::engine::RecognizerEngine;
    use crate::testing::{ScriptStep, ScriptedEngine};

    fn chunk() -> ConvertedChunk {
        ConvertedChunk {
            samples: vec![0; 320],
            captured_at: Instant::now(),
        }
    }

    fn session(script: Vec<ScriptStep>) -> RecognizerSession {
        let engine = ScriptedEngine::new(script);
        RecognizerSession::new(
            ChannelId::Microphone,
            engine.create_session(16_000, 1).unwrap(),
        )
    }

    #[test]
    fn sequence_numbers_strictly_increase() {
        let mut session = session(vec![
            ScriptStep::Partial("a"),
            ScriptStep::Partial("ab"),
            ScriptStep::Final("abc"),
        ]);

        let mut sequences = Vec::new();
        for _ in 0..9 {
            for event in session.feed(&chunk()).unwrap() {
                sequences.push(event.sequence);
            }
        }
        assert_eq!(sequences.len(), 9);
        for pair in sequences.windows(2) {
            assert!(pair[1] > pair[0], "sequences not increasing: {:?}", sequences);
        }
    }

    #[test]
    fn silence_yields_no_events() {
        let mut session = session(vec![ScriptStep::Quiet]);
        for _ in 0..50 {
            assert!(session.feed(&chunk()).unwrap().is_empty());
        }
    }

    #[test]
    fn events_carry_channel_identity() {
        let mut session = session(vec![ScriptStep::Final("done")]);
        let events = session.feed(&chunk()).unwrap();
        assert_eq!(events[0].channel, ChannelId::Microphone);
        assert_eq!(events[0].kind, EventKind::Final);
    }

    #[test]
    fn utterance_start_is_first_chunk_after_final() {
        let mut session = session(vec![
            ScriptStep::Quiet,
            ScriptStep::Final("first"),
            ScriptStep::Quiet,
            ScriptStep::Final("second"),
        ]);

        let first_chunk = chunk();
        session.feed(&first_chunk).unwrap();
        let events = session.feed(&chunk()).unwrap();
        // Utterance began at the first fed chunk, not the emitting one
        assert_eq!(events[0].utterance_start, first_chunk.captured_at);

        // After a final, the next chunk starts a fresh utterance
        let fresh_chunk = chunk();
        session.feed(&fresh_chunk).unwrap();
        let events = session.feed(&chunk()).unwrap();
        assert_eq!(events[0].utterance_start, fresh_chunk.captured_at);
    }

    #[test]
    fn engine_failure_translates_to_channel_error() {
        let mut session = session(vec![ScriptStep::Fail("engine crashed")]);
        let err = session.feed(&chunk()).unwrap_err();
        match err {
            CallscribeError::RecognizerRuntime { channel, message } => {
                assert_eq!(channel, ChannelId::Microphone);
                assert!(message.contains("engine crashed"));
            }
            other => panic!("expected RecognizerRuntime, got {:?}", other),
        }
        assert_eq!(session.error_count(), 1);
    }

    #[test]
    fn confidence_is_clamped_to_unit_range() {
        struct HotEngine;
        impl EngineSession for HotEngine {
            fn feed(&mut self, _: &[i16]) -> crate::error::Result<Vec<EngineEvent>> {
                Ok(vec![EngineEvent {
                    kind: EventKind::Final,
                    text: "x".to_string(),
                    confidence: 3.5,
                }])
            }
            fn finalize(&mut self) -> crate::error::Result<Vec<EngineEvent>> {
                Ok(Vec::new())
            }
        }

        let mut session = RecognizerSession::new(ChannelId::Loopback, Box::new(HotEngine));
        let events = session.feed(&chunk()).unwrap();
        assert_eq!(events[0].confidence, 1.0);
    }
}
