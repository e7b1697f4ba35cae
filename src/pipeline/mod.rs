//! Pipeline orchestration: per-channel workers and the controller that
//! sequences them.

pub mod channel;
pub mod controller;
pub mod types;

pub use channel::{ChannelCounters, ChannelStatus, ChannelWorker, WorkerHandle};
pub use controller::PipelineController;
pub use types::{
    AudioLevel, ChannelId, ChannelMetrics, ChannelProblem, ConvertedChunk, EventKind,
    PipelineMetrics, PipelineState, ProblemKind, TranscriptionEvent,
};
