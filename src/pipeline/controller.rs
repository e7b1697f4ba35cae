//! Pipeline controller: owns capture and recognizer sessions for both
//! channels and sequences startup, shutdown, and degradation.
//!
//! One controller instance is one pipeline; multiple instances can coexist
//! (there is no process-wide state). The state field is mutated only by the
//! thread calling controller methods; worker threads report upward over a
//! one-way status channel drained here.

use crate::audio::capture::CaptureSession;
use crate::audio::converter::ConversionConfig;
use crate::audio::level::LevelCell;
use crate::audio::ring::ChunkRing;
use crate::config::Config;
use crate::device::{DeviceDescriptor, DeviceRegistry, DeviceRole};
use crate::error::{CallscribeError, Result};
use crate::pipeline::channel::{ChannelCounters, ChannelStatus, ChannelWorker, WorkerHandle};
use crate::pipeline::types::{
    AudioLevel, ChannelId, ChannelProblem, PipelineMetrics, PipelineState, ProblemKind,
    TranscriptionEvent,
};
use crate::recognize::{RecognizerEngine, RecognizerSession};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{info, warn};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Everything that lives for one channel while the pipeline runs.
struct ChannelRuntime {
    channel: ChannelId,
    capture: CaptureSession,
    worker: Option<WorkerHandle>,
    counters: Arc<ChannelCounters>,
    ring: Arc<ChunkRing>,
    /// Set once the channel has been demoted; it no longer counts toward
    /// pipeline liveness.
    demoted: bool,
}

/// Owns the capture → recognize pipeline for both channels.
pub struct PipelineController {
    registry: DeviceRegistry,
    engine: Arc<dyn RecognizerEngine>,
    config: Config,
    state: PipelineState,
    channels: Vec<ChannelRuntime>,
    problems: Vec<ChannelProblem>,
    status_tx: Sender<ChannelStatus>,
    status_rx: Receiver<ChannelStatus>,
    transcript_tx: Sender<TranscriptionEvent>,
    transcript_rx: Receiver<TranscriptionEvent>,
    level_tx: Sender<AudioLevel>,
    level_rx: Receiver<AudioLevel>,
    /// Counters folded in from finished sessions, so metrics keep
    /// describing a stopped pipeline.
    metrics_retired: PipelineMetrics,
}

impl PipelineController {
    pub fn new(
        registry: DeviceRegistry,
        engine: Arc<dyn RecognizerEngine>,
        config: Config,
    ) -> Self {
        let (status_tx, status_rx) = bounded(16);
        let (transcript_tx, transcript_rx) = bounded(config.pipeline.transcript_queue);
        let (level_tx, level_rx) = bounded(config.pipeline.level_queue);

        Self {
            registry,
            engine,
            config,
            state: PipelineState::Stopped,
            channels: Vec::new(),
            problems: Vec::new(),
            status_tx,
            status_rx,
            transcript_tx,
            transcript_rx,
            level_tx,
            level_rx,
            metrics_retired: PipelineMetrics::default(),
        }
    }

    /// Current pipeline state, after folding in pending worker reports.
    pub fn state(&mut self) -> PipelineState {
        self.pump_status();
        self.state.clone()
    }

    /// Active per-channel problems. Consumers should render partial service
    /// from these rather than treating one entry as total failure.
    pub fn problems(&mut self) -> Vec<ChannelProblem> {
        self.pump_status();
        self.problems.clone()
    }

    /// Fresh device snapshot from the registry.
    pub fn list_devices(&self) -> Vec<DeviceDescriptor> {
        self.registry.list_devices()
    }

    /// Subscription for transcription events.
    ///
    /// crossbeam receivers are work-stealing; hand the returned receiver to
    /// exactly one consumer per event type.
    pub fn subscribe_transcripts(&self) -> Receiver<TranscriptionEvent> {
        self.transcript_rx.clone()
    }

    /// Subscription for level-meter readings (drop-oldest on overflow).
    pub fn subscribe_levels(&self) -> Receiver<AudioLevel> {
        self.level_rx.clone()
    }

    /// Starts both channels: resolve devices, open capture sessions, build
    /// paired recognizer sessions, spawn consumer workers.
    ///
    /// All-or-nothing: any single failure tears down whatever was built and
    /// returns the error with state back at `Stopped`. Idempotent no-op
    /// when already `Starting` or `Recording`.
    pub fn start(&mut self) -> Result<()> {
        self.pump_status();
        match self.state {
            PipelineState::Recording | PipelineState::Starting => return Ok(()),
            PipelineState::Stopping => {
                return Err(CallscribeError::Other(
                    "cannot start while stopping".to_string(),
                ));
            }
            PipelineState::Stopped | PipelineState::Failed(_) => {}
        }

        self.state = PipelineState::Starting;
        self.problems.clear();
        info!("pipeline starting ({} engine)", self.engine.name());

        // Leftovers from a failed run are torn down before reopening
        if !self.channels.is_empty() {
            self.teardown(Instant::now() + self.config.pipeline.shutdown_grace());
        }

        match self.open_channels() {
            Ok(channels) => {
                self.channels = channels;
            }
            Err(e) => {
                self.state = PipelineState::Stopped;
                warn!("pipeline start aborted: {}", e);
                return Err(e);
            }
        }

        // Open succeeded everywhere; start the native streams. A failure
        // here still aborts the whole start.
        for i in 0..self.channels.len() {
            if let Err(e) = self.channels[i].capture.start() {
                self.teardown(Instant::now() + self.config.pipeline.shutdown_grace());
                self.state = PipelineState::Stopped;
                warn!("pipeline start aborted: {}", e);
                return Err(e);
            }
        }

        self.state = PipelineState::Recording;
        info!("pipeline recording on {} channels", self.channels.len());
        Ok(())
    }

    /// Stops the pipeline: capture first (no new audio), then each
    /// recognizer session finalizes through its worker.
    ///
    /// Bounded: workers that have not finished within the grace period are
    /// abandoned and their channel marked, so one unresponsive recognizer
    /// cannot hang shutdown. Idempotent from `Stopped` or `Stopping`.
    pub fn stop(&mut self) -> Result<()> {
        self.pump_status();
        match self.state {
            PipelineState::Stopped | PipelineState::Stopping => return Ok(()),
            PipelineState::Failed(_) if self.channels.is_empty() => {
                self.state = PipelineState::Stopped;
                return Ok(());
            }
            _ => {}
        }

        self.state = PipelineState::Stopping;
        info!("pipeline stopping");

        let deadline = Instant::now() + self.config.pipeline.shutdown_grace();
        self.teardown(deadline);
        self.pump_status();

        self.state = PipelineState::Stopped;
        info!("pipeline stopped");
        Ok(())
    }

    /// Aggregated diagnostics for the control surface. Counters from
    /// finished sessions stay in the totals after `stop`.
    pub fn metrics(&mut self) -> PipelineMetrics {
        self.pump_status();
        let mut metrics = self.metrics_retired.clone();
        for runtime in &self.channels {
            Self::fold_channel(&mut metrics, runtime);
        }
        metrics
    }

    /// Adds one channel's live counters into `metrics`.
    fn fold_channel(metrics: &mut PipelineMetrics, runtime: &ChannelRuntime) {
        let entry = match runtime.channel {
            ChannelId::Microphone => &mut metrics.microphone,
            ChannelId::Loopback => &mut metrics.loopback,
        };
        entry.dropped_chunks += runtime.ring.dropped_chunks();
        entry.clipped_samples += runtime.capture.clipped_samples();
        entry.lost_events += runtime.counters.lost_events();
        let latency = runtime.counters.average_latency_ms();
        if latency > 0.0 {
            entry.average_chunk_latency_ms = latency;
        }
        metrics.recognizer_error_count += runtime.counters.recognizer_errors();
    }

    /// Opens capture + recognizer + worker for every channel, failing fast.
    fn open_channels(&mut self) -> Result<Vec<ChannelRuntime>> {
        let mut channels = Vec::with_capacity(ChannelId::ALL.len());

        for channel in ChannelId::ALL {
            let role = DeviceRole::for_channel(channel);
            let preferred = self.config.audio.preferred_device(channel);
            let device = self.registry.resolve(role, preferred)?;

            let conversion = ConversionConfig::with_target(
                device.native_sample_rate,
                device.native_channel_count,
                self.config.audio.target_sample_rate,
                self.config.audio.chunk_samples(),
            )?;

            let ring = Arc::new(ChunkRing::new(self.config.pipeline.ring_capacity_chunks));
            let level_cell = Arc::new(LevelCell::new());

            let status_tx = self.status_tx.clone();
            let on_stream_error = Box::new(move |message: String| {
                let _ = status_tx.try_send(ChannelStatus::StreamError { channel, message });
            });

            let capture = CaptureSession::open(
                channel,
                device,
                conversion,
                self.registry.backend().as_ref(),
                Arc::clone(&ring),
                Arc::clone(&level_cell),
                on_stream_error,
            )?;

            let engine_session = self.engine.create_session(
                self.config.audio.target_sample_rate,
                crate::defaults::TARGET_CHANNELS,
            )?;
            let session = RecognizerSession::new(channel, engine_session);

            let worker = ChannelWorker {
                channel,
                ring: Arc::clone(&ring),
                level_cell,
                session,
                transcript_tx: self.transcript_tx.clone(),
                level_tx: self.level_tx.clone(),
                level_rx: self.level_rx.clone(),
                status_tx: self.status_tx.clone(),
            }
            .spawn();

            let counters = worker.counters();
            channels.push(ChannelRuntime {
                channel,
                capture,
                worker: Some(worker),
                counters,
                ring,
                demoted: false,
            });
        }

        Ok(channels)
    }

    /// Closes captures, stops workers, and joins them against a deadline.
    /// Surviving threads past the deadline are detached, not awaited.
    fn teardown(&mut self, deadline: Instant) {
        // Capture first: stops new audio before recognizers finalize
        for runtime in &mut self.channels {
            runtime.capture.close();
        }
        for runtime in &self.channels {
            if let Some(worker) = &runtime.worker {
                worker.request_stop();
            }
        }

        let poll_interval = Duration::from_millis(50);
        loop {
            let mut all_done = true;
            for runtime in &mut self.channels {
                if let Some(worker) = &mut runtime.worker {
                    if worker.try_join() {
                        runtime.worker = None;
                    } else {
                        all_done = false;
                    }
                }
            }
            if all_done {
                break;
            }
            if Instant::now() >= deadline {
                for runtime in &mut self.channels {
                    if let Some(worker) = &mut runtime.worker {
                        let err = CallscribeError::ShutdownTimeout {
                            channel: runtime.channel,
                        };
                        warn!("{}, abandoning worker", err);
                        worker.detach();
                        runtime.worker = None;
                        self.problems.push(ChannelProblem {
                            channel: runtime.channel,
                            kind: ProblemKind::ShutdownTimeout,
                            detail: err.to_string(),
                            occurred_at: Instant::now(),
                        });
                    }
                }
                break;
            }
            thread::sleep(poll_interval);
        }

        // Counters survive the session; detached workers still share them
        for runtime in &self.channels {
            Self::fold_channel(&mut self.metrics_retired, runtime);
        }
        self.channels.clear();
    }

    /// Folds pending worker status reports into controller state.
    ///
    /// A failed channel is demoted: its capture closes and a problem is
    /// recorded, but the other channel keeps recording. The pipeline only
    /// fails when every channel has.
    fn pump_status(&mut self) {
        while let Ok(status) = self.status_rx.try_recv() {
            let (channel, kind, detail) = match status {
                ChannelStatus::RecognizerFailed { channel, message } => {
                    (channel, ProblemKind::RecognizerFailed, message)
                }
                ChannelStatus::StreamError { channel, message } => {
                    (channel, ProblemKind::StreamError, message)
                }
            };

            warn!("{}: degraded: {}", channel, detail);
            self.problems.push(ChannelProblem {
                channel,
                kind,
                detail,
                occurred_at: Instant::now(),
            });

            if let Some(runtime) = self.channels.iter_mut().find(|r| r.channel == channel) {
                runtime.demoted = true;
                runtime.capture.close();
                if let Some(worker) = &runtime.worker {
                    worker.request_stop();
                }
            }
        }

        if self.state == PipelineState::Recording
            && !self.channels.is_empty()
            && self.channels.iter().all(|r| r.demoted)
        {
            self.state = PipelineState::Failed("all channels failed".to_string());
        }
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        if !self.channels.is_empty() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, ScriptStep, ScriptedEngine};

    fn controller_with(
        backend: MockBackend,
        engine: ScriptedEngine,
    ) -> PipelineController {
        PipelineController::new(
            DeviceRegistry::new(Arc::new(backend)),
            Arc::new(engine),
            Config::default(),
        )
    }

    #[test]
    fn start_transitions_to_recording() {
        let backend = MockBackend::with_default_devices();
        let mut controller = controller_with(backend.clone(), ScriptedEngine::silent());

        controller.start().expect("start");
        assert_eq!(controller.state(), PipelineState::Recording);
        assert!(backend.is_streaming(DeviceRole::Input));
        assert!(backend.is_streaming(DeviceRole::Loopback));

        controller.stop().expect("stop");
        assert_eq!(controller.state(), PipelineState::Stopped);
    }

    #[test]
    fn start_is_idempotent_while_recording() {
        let backend = MockBackend::with_default_devices();
        let mut controller = controller_with(backend.clone(), ScriptedEngine::silent());

        controller.start().expect("start");
        controller.start().expect("second start is a no-op");
        assert_eq!(backend.open_stream_count(), 2);
        controller.stop().expect("stop");
    }

    #[test]
    fn stop_is_idempotent_from_stopped() {
        let backend = MockBackend::with_default_devices();
        let mut controller = controller_with(backend, ScriptedEngine::silent());

        assert_eq!(controller.state(), PipelineState::Stopped);
        controller.stop().expect("stop from Stopped");
        controller.stop().expect("stop again");
        assert_eq!(controller.state(), PipelineState::Stopped);
    }

    #[test]
    fn missing_loopback_device_aborts_start() {
        let backend = MockBackend::new()
            .with_devices(vec![MockBackend::descriptor("mock-mic", DeviceRole::Input)]);
        let mut controller = controller_with(backend, ScriptedEngine::silent());

        let err = controller.start().unwrap_err();
        assert!(matches!(err, CallscribeError::DeviceNotFound { .. }));
        // No partially-started pipeline is left running
        assert_eq!(controller.state(), PipelineState::Stopped);
    }

    #[test]
    fn recognizer_init_failure_aborts_start_entirely() {
        let backend = MockBackend::with_default_devices();
        let mut controller =
            controller_with(backend.clone(), ScriptedEngine::silent().with_create_failure());

        let err = controller.start().unwrap_err();
        assert!(matches!(err, CallscribeError::RecognizerInitFailed { .. }));
        assert_eq!(controller.state(), PipelineState::Stopped);
        assert!(!backend.is_streaming(DeviceRole::Input));
    }

    #[test]
    fn stream_open_failure_aborts_start_entirely() {
        let backend = MockBackend::with_default_devices().with_open_failure("mock-loopback");
        let mut controller = controller_with(backend.clone(), ScriptedEngine::silent());

        let err = controller.start().unwrap_err();
        assert!(matches!(err, CallscribeError::StreamOpenFailed { .. }));
        assert_eq!(controller.state(), PipelineState::Stopped);
        assert!(!backend.is_streaming(DeviceRole::Input));
    }

    #[test]
    fn single_channel_failure_degrades_not_fails() {
        let backend = MockBackend::with_default_devices();
        let mut controller = controller_with(backend.clone(), ScriptedEngine::silent());
        controller.start().expect("start");

        backend.fail_stream(DeviceRole::Loopback, "device unplugged");
        // Give the status report time to land
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(controller.state(), PipelineState::Recording);
        let problems = controller.problems();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].channel, ChannelId::Loopback);
        assert_eq!(problems[0].kind, ProblemKind::StreamError);

        // The surviving channel still streams
        assert!(backend.is_streaming(DeviceRole::Input));
        controller.stop().expect("stop");
    }

    #[test]
    fn all_channel_failures_fail_the_pipeline() {
        let backend = MockBackend::with_default_devices();
        let mut controller = controller_with(backend.clone(), ScriptedEngine::silent());
        controller.start().expect("start");

        backend.fail_stream(DeviceRole::Input, "gone");
        backend.fail_stream(DeviceRole::Loopback, "gone");
        std::thread::sleep(Duration::from_millis(50));

        assert!(matches!(controller.state(), PipelineState::Failed(_)));
        controller.stop().expect("stop clears failure");
        assert_eq!(controller.state(), PipelineState::Stopped);
    }

    #[test]
    fn metrics_report_zero_drops_without_overload() {
        let backend = MockBackend::with_default_devices();
        let mut controller = controller_with(backend.clone(), ScriptedEngine::silent());
        controller.start().expect("start");

        // One full chunk of audio into each channel
        backend.feed(DeviceRole::Input, &vec![0.1f32; 960 * 2]);
        backend.feed(DeviceRole::Loopback, &vec![0.1f32; 960 * 2]);
        std::thread::sleep(Duration::from_millis(150));

        let metrics = controller.metrics();
        assert_eq!(metrics.microphone.dropped_chunks, 0);
        assert_eq!(metrics.loopback.dropped_chunks, 0);
        assert_eq!(metrics.recognizer_error_count, 0);
        controller.stop().expect("stop");
    }
}
