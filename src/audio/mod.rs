//! Audio capture, conversion, metering, and buffering.

pub mod capture;
pub mod converter;
pub mod level;
pub mod ring;

pub use capture::{CaptureSession, CaptureState};
pub use converter::{ConversionConfig, FormatConverter};
pub use level::{LevelCell, LevelMonitor};
pub use ring::ChunkRing;
