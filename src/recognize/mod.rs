//! Speech recognition: engine abstraction and per-channel sessions.

pub mod engine;
pub mod session;

#[cfg(feature = "whisper")]
pub mod whisper;

pub use engine::{EngineEvent, EngineSession, RecognizerEngine};
pub use session::RecognizerSession;

#[cfg(feature = "whisper")]
pub use whisper::{WhisperEngine, WhisperEngineConfig};
