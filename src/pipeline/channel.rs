//! Per-channel consumer worker.
//!
//! One worker thread per channel blocks on the chunk ring, drives the
//! recognizer session, republishes the latest level reading, and reports
//! status upward over a one-way channel. This is the only thread on the
//! channel that blocks; the capture callback never does.

use crate::audio::level::LevelCell;
use crate::audio::ring::ChunkRing;
use crate::defaults;
use crate::pipeline::types::{AudioLevel, ChannelId, ConvertedChunk, TranscriptionEvent};
use crate::recognize::session::RecognizerSession;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Status reports from a channel worker to the controller.
///
/// Workers never mutate controller state directly; the controller drains
/// these from its own thread.
#[derive(Debug, Clone)]
pub enum ChannelStatus {
    /// The recognizer failed; this channel stopped emitting events.
    RecognizerFailed { channel: ChannelId, message: String },
    /// The native stream reported a driver error.
    StreamError { channel: ChannelId, message: String },
}

/// Counters shared between a worker thread and the controller.
#[derive(Default)]
pub struct ChannelCounters {
    /// Total capture-to-feed latency, microseconds.
    latency_sum_us: AtomicU64,
    latency_count: AtomicU64,
    /// Events dropped because the transcript subscriber stayed full.
    lost_events: AtomicU64,
    recognizer_errors: AtomicU64,
}

impl ChannelCounters {
    pub fn average_latency_ms(&self) -> f64 {
        let count = self.latency_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let sum_us = self.latency_sum_us.load(Ordering::Relaxed);
        sum_us as f64 / count as f64 / 1000.0
    }

    pub fn lost_events(&self) -> u64 {
        self.lost_events.load(Ordering::Relaxed)
    }

    pub fn recognizer_errors(&self) -> u64 {
        self.recognizer_errors.load(Ordering::Relaxed)
    }
}

/// Everything a worker thread needs to run one channel.
pub struct ChannelWorker {
    pub channel: ChannelId,
    pub ring: Arc<ChunkRing>,
    pub level_cell: Arc<LevelCell>,
    pub session: RecognizerSession,
    pub transcript_tx: Sender<TranscriptionEvent>,
    pub level_tx: Sender<AudioLevel>,
    /// Receiver clone used to implement drop-oldest on a full level queue.
    pub level_rx: Receiver<AudioLevel>,
    pub status_tx: Sender<ChannelStatus>,
}

/// Handle to a running channel worker.
pub struct WorkerHandle {
    channel: ChannelId,
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    counters: Arc<ChannelCounters>,
}

impl WorkerHandle {
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn counters(&self) -> Arc<ChannelCounters> {
        Arc::clone(&self.counters)
    }

    /// Signals the worker to drain, finalize, and exit.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Joins the worker thread if it has finished; returns true on success.
    /// A panic in the worker is logged, not propagated.
    pub fn try_join(&mut self) -> bool {
        let finished = self.is_finished();
        if finished {
            if let Some(join) = self.join.take() {
                if let Err(panic_info) = join.join() {
                    let msg = panic_info
                        .downcast_ref::<&str>()
                        .copied()
                        .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
                        .unwrap_or("unknown panic");
                    warn!("{}: worker thread panicked: {}", self.channel, msg);
                }
            }
        }
        finished
    }

    /// Drops the join handle; the thread dies with the process.
    pub fn detach(&mut self) {
        self.join.take();
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Signal only; the thread finalizes on its own and is not awaited
        self.request_stop();
        self.join.take();
    }
}

impl ChannelWorker {
    /// Spawns the consumer thread for this channel.
    pub fn spawn(self) -> WorkerHandle {
        let channel = self.channel;
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(ChannelCounters::default());

        let thread_running = Arc::clone(&running);
        let thread_counters = Arc::clone(&counters);
        let join = thread::Builder::new()
            .name(format!("callscribe-{}", channel))
            .spawn(move || self.run(thread_running, thread_counters))
            .ok();

        WorkerHandle {
            channel,
            running,
            join,
            counters,
        }
    }

    fn run(mut self, running: Arc<AtomicBool>, counters: Arc<ChannelCounters>) {
        debug!("{}: worker started", self.channel);

        while running.load(Ordering::SeqCst) {
            if let Some(chunk) = self.ring.pop_blocking(defaults::POP_TIMEOUT) {
                let latency = chunk.captured_at.elapsed();
                counters
                    .latency_sum_us
                    .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
                counters.latency_count.fetch_add(1, Ordering::Relaxed);

                if !self.feed_chunk(&chunk, &counters) {
                    return;
                }
            }
            self.forward_level();
        }

        // Shutdown: capture already stopped, so the ring only drains.
        while let Some(chunk) = self.ring.pop() {
            if !self.feed_chunk(&chunk, &counters) {
                return;
            }
        }

        match self.session.finalize() {
            Ok(events) => {
                for event in events {
                    self.publish(event, &counters);
                }
            }
            Err(e) => {
                counters.recognizer_errors.fetch_add(1, Ordering::Relaxed);
                let _ = self.status_tx.try_send(ChannelStatus::RecognizerFailed {
                    channel: self.channel,
                    message: e.to_string(),
                });
            }
        }

        debug!("{}: worker finished", self.channel);
    }

    /// Feeds one chunk; returns false when the channel must stop.
    fn feed_chunk(
        &mut self,
        chunk: &ConvertedChunk,
        counters: &ChannelCounters,
    ) -> bool {
        match self.session.feed(chunk) {
            Ok(events) => {
                for event in events {
                    self.publish(event, counters);
                }
                true
            }
            Err(e) => {
                counters.recognizer_errors.fetch_add(1, Ordering::Relaxed);
                warn!("{}: recognizer failed: {}", self.channel, e);
                let _ = self.status_tx.try_send(ChannelStatus::RecognizerFailed {
                    channel: self.channel,
                    message: e.to_string(),
                });
                false
            }
        }
    }

    /// Delivers a transcription event to the subscriber queue.
    ///
    /// Transcript loss is a correctness defect, so the queue is sized to
    /// avoid drops and the send waits briefly; after the timeout the event
    /// is counted lost rather than blocking the pipeline indefinitely.
    fn publish(&self, event: TranscriptionEvent, counters: &ChannelCounters) {
        if self
            .transcript_tx
            .send_timeout(event, defaults::TRANSCRIPT_SEND_TIMEOUT)
            .is_err()
        {
            counters.lost_events.fetch_add(1, Ordering::Relaxed);
            warn!("{}: transcript subscriber not keeping up, event lost", self.channel);
        }
    }

    /// Forwards the latest level reading, dropping the oldest queued value
    /// when the subscriber queue is full. Levels are superseded
    /// continuously; losing stale ones is harmless.
    fn forward_level(&self) {
        if let Some(level) = self.level_cell.take() {
            if self.level_tx.try_send(level).is_err() {
                let _ = self.level_rx.try_recv();
                let _ = self.level_tx.try_send(level);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::EventKind;
    use crate::recognize::engine::RecognizerEngine;
    use crate::testing::{ScriptStep, ScriptedEngine};
    use crossbeam_channel::bounded;
    use std::time::{Duration, Instant};

    struct Harness {
        worker: Option<WorkerHandle>,
        ring: Arc<ChunkRing>,
        transcript_rx: Receiver<TranscriptionEvent>,
        status_rx: Receiver<ChannelStatus>,
    }

    fn start_worker(script: Vec<ScriptStep>) -> Harness {
        let ring = Arc::new(ChunkRing::new(64));
        let level_cell = Arc::new(LevelCell::new());
        let (transcript_tx, transcript_rx) = bounded(defaults::TRANSCRIPT_QUEUE_CAPACITY);
        let (level_tx, level_rx) = bounded(defaults::LEVEL_QUEUE_CAPACITY);
        let (status_tx, status_rx) = bounded(16);

        let engine = ScriptedEngine::new(script);
        let session = RecognizerSession::new(
            ChannelId::Microphone,
            engine.create_session(16_000, 1).unwrap(),
        );

        let worker = ChannelWorker {
            channel: ChannelId::Microphone,
            ring: Arc::clone(&ring),
            level_cell,
            session,
            transcript_tx,
            level_tx,
            level_rx,
            status_tx,
        }
        .spawn();

        Harness {
            worker: Some(worker),
            ring,
            transcript_rx,
            status_rx,
        }
    }

    fn chunk() -> ConvertedChunk {
        ConvertedChunk {
            samples: vec![0; 320],
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn worker_feeds_chunks_and_publishes_events() {
        let mut harness = start_worker(vec![ScriptStep::Final("hello world")]);

        harness.ring.push(chunk());
        let event = harness
            .transcript_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("event published");
        assert_eq!(event.kind, EventKind::Final);
        assert_eq!(event.text, "hello world");

        let worker = harness.worker.as_mut().unwrap();
        worker.request_stop();
        for _ in 0..50 {
            if worker.try_join() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(worker.is_finished());
    }

    #[test]
    fn worker_reports_recognizer_failure_and_stops() {
        let harness = start_worker(vec![ScriptStep::Fail("boom")]);

        harness.ring.push(chunk());
        let status = harness
            .status_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("status reported");
        match status {
            ChannelStatus::RecognizerFailed { channel, message } => {
                assert_eq!(channel, ChannelId::Microphone);
                assert!(message.contains("boom"));
            }
            other => panic!("expected RecognizerFailed, got {:?}", other),
        }

        let mut worker = harness.worker.unwrap();
        for _ in 0..50 {
            if worker.try_join() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(worker.is_finished());
    }

    #[test]
    fn worker_drains_ring_before_finalizing() {
        let mut harness = start_worker(vec![ScriptStep::Final("flushed")]);

        // Stop immediately; pre-loaded chunks must still be processed
        for _ in 0..3 {
            harness.ring.push(chunk());
        }
        let worker = harness.worker.as_mut().unwrap();
        worker.request_stop();

        let mut finals = 0;
        while let Ok(event) = harness.transcript_rx.recv_timeout(Duration::from_secs(2)) {
            if event.kind == EventKind::Final {
                finals += 1;
            }
            if finals == 3 {
                break;
            }
        }
        assert_eq!(finals, 3);
    }

    #[test]
    fn worker_tracks_latency() {
        let mut harness = start_worker(vec![ScriptStep::Quiet]);
        let counters = harness.worker.as_ref().unwrap().counters();

        harness.ring.push(chunk());
        std::thread::sleep(Duration::from_millis(100));
        assert!(counters.average_latency_ms() >= 0.0);
        assert_eq!(counters.recognizer_errors(), 0);

        harness.worker.as_mut().unwrap().request_stop();
    }
}
