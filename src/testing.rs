//! Test doubles for the audio backend and recognizer engine.
//!
//! These live in the main tree (not behind `cfg(test)`) so integration
//! tests and downstream consumers can drive the pipeline without hardware
//! or a model file.

use crate::device::{AudioBackend, DeviceDescriptor, DeviceRole, SampleFormat, StreamHandle};
use crate::error::{CallscribeError, Result};
use crate::recognize::engine::{EngineEvent, EngineSession, RecognizerEngine};
use crate::pipeline::types::EventKind;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type BlockCallback = Box<dyn FnMut(&[f32], Instant) + Send>;
type ErrorCallback = Box<dyn FnMut(String) + Send>;

struct MockStreamState {
    role: DeviceRole,
    started: Arc<AtomicBool>,
    on_block: Mutex<BlockCallback>,
    on_error: Mutex<ErrorCallback>,
}

struct MockBackendInner {
    devices: Mutex<Vec<DeviceDescriptor>>,
    failing_enumeration: Mutex<HashSet<String>>,
    failing_open: Mutex<HashSet<String>>,
    streams: Mutex<Vec<Arc<MockStreamState>>>,
}

/// In-memory [`AudioBackend`] that lets a test push native blocks into open
/// streams as if a driver callback fired.
#[derive(Clone)]
pub struct MockBackend {
    inner: Arc<MockBackendInner>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockBackendInner {
                devices: Mutex::new(Vec::new()),
                failing_enumeration: Mutex::new(HashSet::new()),
                failing_open: Mutex::new(HashSet::new()),
                streams: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Backend with one default microphone and one default loopback device,
    /// both 48kHz stereo f32.
    pub fn with_default_devices() -> Self {
        Self::new().with_devices(vec![
            Self::descriptor("mock-mic", DeviceRole::Input),
            Self::descriptor("mock-loopback", DeviceRole::Loopback),
        ])
    }

    /// A 48kHz stereo f32 default device descriptor.
    pub fn descriptor(id: &str, role: DeviceRole) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.to_string(),
            display_name: id.to_string(),
            role,
            native_sample_rate: 48_000,
            native_channel_count: 2,
            native_sample_format: SampleFormat::F32,
            is_default: true,
        }
    }

    pub fn with_devices(self, devices: Vec<DeviceDescriptor>) -> Self {
        *self.inner.devices.lock().expect("mock lock") = devices;
        self
    }

    /// Makes enumeration for `role` fail outright.
    pub fn with_enumeration_failure(self, role: DeviceRole) -> Self {
        self.inner
            .failing_enumeration
            .lock()
            .expect("mock lock")
            .insert(role.to_string());
        self
    }

    /// Makes `open_stream` fail for the named device.
    pub fn with_open_failure(self, device_id: &str) -> Self {
        self.inner
            .failing_open
            .lock()
            .expect("mock lock")
            .insert(device_id.to_string());
        self
    }

    /// Delivers one native block to every started stream of `role`, as if
    /// the driver callback fired.
    pub fn feed(&self, role: DeviceRole, block: &[f32]) {
        let streams = self.inner.streams.lock().expect("mock lock");
        for stream in streams.iter() {
            if stream.role == role && stream.started.load(Ordering::SeqCst) {
                let mut on_block = stream.on_block.lock().expect("mock lock");
                on_block(block, Instant::now());
            }
        }
    }

    /// Raises a mid-stream driver error on every stream of `role`.
    pub fn fail_stream(&self, role: DeviceRole, message: &str) {
        let streams = self.inner.streams.lock().expect("mock lock");
        for stream in streams.iter() {
            if stream.role == role {
                let mut on_error = stream.on_error.lock().expect("mock lock");
                on_error(message.to_string());
            }
        }
    }

    /// Number of streams opened so far (started or not).
    pub fn open_stream_count(&self) -> usize {
        self.inner.streams.lock().expect("mock lock").len()
    }

    /// True if any stream of `role` is currently started.
    pub fn is_streaming(&self, role: DeviceRole) -> bool {
        self.inner
            .streams
            .lock()
            .expect("mock lock")
            .iter()
            .any(|s| s.role == role && s.started.load(Ordering::SeqCst))
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for MockBackend {
    fn devices(&self, role: DeviceRole) -> Result<Vec<DeviceDescriptor>> {
        if self
            .inner
            .failing_enumeration
            .lock()
            .expect("mock lock")
            .contains(&role.to_string())
        {
            return Err(CallscribeError::Other(format!(
                "mock enumeration failure for {} role",
                role
            )));
        }
        Ok(self
            .inner
            .devices
            .lock()
            .expect("mock lock")
            .iter()
            .filter(|d| d.role == role)
            .cloned()
            .collect())
    }

    fn open_stream(
        &self,
        device: &DeviceDescriptor,
        on_block: BlockCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn StreamHandle>> {
        if self
            .inner
            .failing_open
            .lock()
            .expect("mock lock")
            .contains(&device.id)
        {
            return Err(CallscribeError::StreamOpenFailed {
                device: device.id.clone(),
                message: "mock open failure".to_string(),
            });
        }

        let state = Arc::new(MockStreamState {
            role: device.role,
            started: Arc::new(AtomicBool::new(false)),
            on_block: Mutex::new(on_block),
            on_error: Mutex::new(on_error),
        });
        self.inner
            .streams
            .lock()
            .expect("mock lock")
            .push(Arc::clone(&state));

        Ok(Box::new(MockStreamHandle { state }))
    }
}

struct MockStreamHandle {
    state: Arc<MockStreamState>,
}

impl StreamHandle for MockStreamHandle {
    fn start(&mut self) -> Result<()> {
        self.state.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.state.started.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// One step of a [`ScriptedEngine`] script.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Return no events for this chunk (silence).
    Quiet,
    /// Emit a partial hypothesis.
    Partial(&'static str),
    /// Emit a final result.
    Final(&'static str),
    /// Fail the feed call.
    Fail(&'static str),
}

/// Recognizer engine whose sessions replay a fixed script, one step per
/// fed chunk, cycling when the script is exhausted.
#[derive(Clone)]
pub struct ScriptedEngine {
    script: Arc<Vec<ScriptStep>>,
    /// Overrides `script` for the nth created session; later sessions fall
    /// back to the last entry.
    per_session: Arc<Vec<Vec<ScriptStep>>>,
    fail_create: bool,
    finalize_hang: Option<Duration>,
    sessions_created: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script: Arc::new(script),
            per_session: Arc::new(Vec::new()),
            fail_create: false,
            finalize_hang: None,
            sessions_created: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Engine that stays silent on every chunk.
    pub fn silent() -> Self {
        Self::new(vec![ScriptStep::Quiet])
    }

    /// Engine whose sessions get distinct scripts in creation order.
    pub fn with_session_scripts(scripts: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            script: Arc::new(vec![ScriptStep::Quiet]),
            per_session: Arc::new(scripts),
            fail_create: false,
            finalize_hang: None,
            sessions_created: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes `create_session` fail, for all-or-nothing start tests.
    pub fn with_create_failure(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Makes every session sleep in `finalize`, for bounded-shutdown tests.
    pub fn with_hanging_finalize(mut self, hang: Duration) -> Self {
        self.finalize_hang = Some(hang);
        self
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }
}

impl RecognizerEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn create_session(&self, _sample_rate: u32, _channels: u16) -> Result<Box<dyn EngineSession>> {
        if self.fail_create {
            return Err(CallscribeError::RecognizerInitFailed {
                message: "mock create failure".to_string(),
            });
        }
        let index = self.sessions_created.fetch_add(1, Ordering::SeqCst);
        let script = if self.per_session.is_empty() {
            Arc::clone(&self.script)
        } else {
            let pick = index.min(self.per_session.len() - 1);
            Arc::new(self.per_session[pick].clone())
        };
        Ok(Box::new(ScriptedSession {
            script,
            position: 0,
            finalize_hang: self.finalize_hang,
        }))
    }
}

struct ScriptedSession {
    script: Arc<Vec<ScriptStep>>,
    position: usize,
    finalize_hang: Option<Duration>,
}

impl EngineSession for ScriptedSession {
    fn feed(&mut self, _pcm: &[i16]) -> Result<Vec<EngineEvent>> {
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let step = self.script[self.position % self.script.len()].clone();
        self.position += 1;
        match step {
            ScriptStep::Quiet => Ok(Vec::new()),
            ScriptStep::Partial(text) => Ok(vec![EngineEvent {
                kind: EventKind::Partial,
                text: text.to_string(),
                confidence: 0.5,
            }]),
            ScriptStep::Final(text) => Ok(vec![EngineEvent {
                kind: EventKind::Final,
                text: text.to_string(),
                confidence: 0.9,
            }]),
            ScriptStep::Fail(message) => Err(CallscribeError::Other(message.to_string())),
        }
    }

    fn finalize(&mut self) -> Result<Vec<EngineEvent>> {
        if let Some(hang) = self.finalize_hang {
            std::thread::sleep(hang);
        }
        Ok(Vec::new())
    }
}
