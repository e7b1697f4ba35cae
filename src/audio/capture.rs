//! Capture session: one native stream wired to the level monitor and the
//! chunk ring.
//!
//! The data callback does exactly three things per invocation, in order:
//! write the level cell, run the format converter and push resulting chunks
//! to the ring, return. No logging, no I/O, no locking beyond the cell and
//! ring writes.

use crate::audio::converter::{ConversionConfig, FormatConverter};
use crate::audio::level::{LevelCell, LevelMonitor};
use crate::audio::ring::ChunkRing;
use crate::device::{AudioBackend, DeviceDescriptor, StreamHandle};
use crate::error::{CallscribeError, Result};
use crate::pipeline::types::ChannelId;
use log::{debug, info};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Opening,
    Streaming,
    Closing,
    Closed,
    /// Reachable from `Opening` or `Streaming`; `close()` remains safe.
    Errored,
}

impl CaptureState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => CaptureState::Idle,
            1 => CaptureState::Opening,
            2 => CaptureState::Streaming,
            3 => CaptureState::Closing,
            4 => CaptureState::Closed,
            _ => CaptureState::Errored,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CaptureState::Idle => 0,
            CaptureState::Opening => 1,
            CaptureState::Streaming => 2,
            CaptureState::Closing => 3,
            CaptureState::Closed => 4,
            CaptureState::Errored => 5,
        }
    }
}

/// Owns one native audio stream and its conversion state.
///
/// The stream handle never leaves the session; the controller only sees
/// this session's start/stop surface. Created from a device descriptor
/// taken from a registry snapshot at construction time.
pub struct CaptureSession {
    channel: ChannelId,
    device: DeviceDescriptor,
    conversion: ConversionConfig,
    stream: Option<Box<dyn StreamHandle>>,
    state: Arc<AtomicU8>,
    ring: Arc<ChunkRing>,
    level_cell: Arc<LevelCell>,
    clipped: Arc<std::sync::atomic::AtomicU64>,
}

impl CaptureSession {
    /// Opens a native stream on `device` and wires its callback.
    ///
    /// The stream is requested at the device's native parameters — the
    /// format converter does all conversion, keeping device negotiation
    /// simple and portable. `conversion` must have been validated against
    /// this device's native format; see [`ConversionConfig::new`].
    ///
    /// # Errors
    /// `StreamOpenFailed` when the backend rejects the stream.
    pub fn open(
        channel: ChannelId,
        device: DeviceDescriptor,
        conversion: ConversionConfig,
        backend: &dyn AudioBackend,
        ring: Arc<ChunkRing>,
        level_cell: Arc<LevelCell>,
        on_stream_error: Box<dyn FnMut(String) + Send>,
    ) -> Result<Self> {
        let state = Arc::new(AtomicU8::new(CaptureState::Opening.as_u8()));

        let mut converter = FormatConverter::new(conversion);
        let clipped = converter.clipped_counter();
        let mut monitor = LevelMonitor::new(channel, Arc::clone(&level_cell));

        debug!(
            "{}: opening capture on '{}' ({}ch/{}Hz, decimation x{})",
            channel,
            device.id,
            device.native_channel_count,
            device.native_sample_rate,
            conversion.decimation_factor(),
        );

        let callback_ring = Arc::clone(&ring);
        let on_block = Box::new(move |block: &[f32], captured_at| {
            // (a) level meter side channel — single-slot overwrite
            monitor.update(block);
            // (b) convert and hand off complete chunks
            for chunk in converter.convert(block, captured_at) {
                callback_ring.push(chunk);
            }
        });

        let error_state = Arc::clone(&state);
        let mut forward_error = on_stream_error;
        let on_error = Box::new(move |message: String| {
            error_state.store(CaptureState::Errored.as_u8(), Ordering::SeqCst);
            forward_error(message);
        });

        let stream = backend
            .open_stream(&device, on_block, on_error)
            .map_err(|e| {
                state.store(CaptureState::Errored.as_u8(), Ordering::SeqCst);
                e
            })?;

        Ok(Self {
            channel,
            device,
            conversion,
            stream: Some(stream),
            state,
            ring,
            level_cell,
            clipped,
        })
    }

    /// Starts the native stream; the callback begins firing.
    pub fn start(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CallscribeError::StreamOpenFailed {
                device: self.device.id.clone(),
                message: "session already closed".to_string(),
            })?;
        stream.start()?;
        self.state
            .store(CaptureState::Streaming.as_u8(), Ordering::SeqCst);
        info!("{}: capture streaming on '{}'", self.channel, self.device.id);
        Ok(())
    }

    /// Stops and releases the native stream.
    ///
    /// Idempotent and safe to call from `Errored`; closing an already
    /// closed session is a no-op.
    pub fn close(&mut self) {
        if self.stream.is_none() {
            return;
        }
        self.state
            .store(CaptureState::Closing.as_u8(), Ordering::SeqCst);
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.stop() {
                debug!("{}: error stopping stream: {}", self.channel, e);
            }
        }
        self.state
            .store(CaptureState::Closed.as_u8(), Ordering::SeqCst);
        info!("{}: capture closed", self.channel);
    }

    pub fn state(&self) -> CaptureState {
        CaptureState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn conversion(&self) -> &ConversionConfig {
        &self.conversion
    }

    pub fn ring(&self) -> Arc<ChunkRing> {
        Arc::clone(&self.ring)
    }

    pub fn level_cell(&self) -> Arc<LevelCell> {
        Arc::clone(&self.level_cell)
    }

    /// Samples clamped during quantization so far.
    pub fn clipped_samples(&self) -> u64 {
        self.clipped.load(Ordering::Relaxed)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}
