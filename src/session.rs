//! Worker lifecycle: one thread per stream, driving a [`LotDetector`] from a
//! [`FrameSource`].
//!
//! The worker processes frames strictly in order and publishes a snapshot after each
//! one. Readers only ever touch the [`SnapshotReader`]. Shutdown is cooperative: the
//! loop polls a stop flag every iteration and during every sleep, and always releases
//! the source before the thread exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::FrameSource;
use crate::status::{ParkingLotSnapshot, SnapshotReader, SpaceStatus};
use crate::LotDetector;

/// Longest uninterrupted sleep; bounds how late a stop request is noticed.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

// -------------------- Retry Policy --------------------

/// Bounded retry of failed reads with exponential backoff.
///
/// Failures `1..=max_retries` in a row are retried (each after a backoff and a
/// reconnect); failure `max_retries + 1` ends the stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry `attempt` (1-based): `initial * 2^(attempt - 1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(anyhow!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.initial_backoff_ms,
                self.max_backoff_ms
            ));
        }
        Ok(())
    }
}

// -------------------- Errors & Events --------------------

/// Fatal stream conditions reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The source could not be opened at start.
    Connect { error: String },
    /// `attempts` consecutive reads failed.
    RetriesExhausted { attempts: u32, last_error: String },
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect { error } => write!(f, "failed to connect frame source: {}", error),
            Self::RetriesExhausted {
                attempts,
                last_error,
            } => write!(
                f,
                "frame source failed {} consecutive reads; last error: {}",
                attempts, last_error
            ),
        }
    }
}

impl std::error::Error for StreamError {}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Started,
    Transition {
        id: u32,
        status: SpaceStatus,
        pts: f64,
    },
    ReadFailed {
        attempt: u32,
        error: String,
    },
    Reconnected,
    FrameSkipped {
        error: String,
    },
    EndOfStream,
    StreamFailed {
        error: String,
    },
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    EndOfStream,
}

/// What a worker did before it stopped cleanly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    pub reason: StopReason,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    /// Frames read but left unanalysed because of `detection_interval`.
    pub frames_passed_over: u64,
    pub read_failures: u64,
    pub reconnects: u64,
}

// -------------------- Session --------------------

#[derive(Clone, Debug, PartialEq)]
pub struct SessionOptions {
    /// Pacing rate; `None` processes frames as fast as the source yields them.
    pub target_fps: Option<f64>,
    /// Frame to seek to after connecting; 0 skips the seek.
    pub start_frame: u64,
    /// Analyse every Nth frame read; the ones in between are dropped unprocessed.
    pub detection_interval: u32,
    pub retry: RetryPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            target_fps: Some(30.0),
            start_frame: 0,
            detection_interval: 1,
            retry: RetryPolicy::default(),
        }
    }
}

/// A detector bound to a source, ready to run.
pub struct Session {
    detector: LotDetector,
    source: Box<dyn FrameSource>,
    options: SessionOptions,
}

impl Session {
    pub fn new(
        detector: LotDetector,
        source: Box<dyn FrameSource>,
        options: SessionOptions,
    ) -> Self {
        Self {
            detector,
            source,
            options,
        }
    }

    /// Connect the source and move everything onto a dedicated worker thread.
    ///
    /// Connection failures are returned here as [`StreamError::Connect`]; everything
    /// after that is reported through the handle.
    pub fn start(self) -> Result<SessionHandle> {
        let Session {
            detector,
            mut source,
            options,
        } = self;

        if let Some(fps) = options.target_fps {
            if !fps.is_finite() || fps <= 0.0 {
                return Err(anyhow!("target_fps must be positive"));
            }
        }
        if options.detection_interval == 0 {
            return Err(anyhow!("detection_interval must be at least 1"));
        }
        options.retry.validate()?;

        if let Err(err) = source.connect() {
            source.release();
            return Err(StreamError::Connect {
                error: format!("{:#}", err),
            }
            .into());
        }
        if options.start_frame > 0 {
            if let Err(err) = source.seek(options.start_frame) {
                source.release();
                return Err(err.context(format!("seek to start frame {}", options.start_frame)));
            }
        }

        let reader = detector.reader();
        let shutdown = Arc::new(AtomicBool::new(false));
        let (events_tx, events_rx) = mpsc::channel();

        let worker = Worker {
            detector,
            source,
            options,
            shutdown: Arc::clone(&shutdown),
            events: events_tx,
        };
        let join = std::thread::Builder::new()
            .name("occupancy-worker".to_string())
            .spawn(move || worker.run())
            .context("spawn occupancy worker")?;

        Ok(SessionHandle {
            reader,
            events: events_rx,
            shutdown,
            join: Some(join),
        })
    }
}

/// Control side of a running worker.
pub struct SessionHandle {
    reader: SnapshotReader,
    events: Receiver<SessionEvent>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<Result<SessionSummary>>>,
}

impl SessionHandle {
    pub fn reader(&self) -> SnapshotReader {
        self.reader.clone()
    }

    pub fn latest(&self) -> Arc<ParkingLotSnapshot> {
        self.reader.latest()
    }

    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    /// True once the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Request shutdown and wait for the worker.
    ///
    /// Returns the worker's outcome; a fatal stream failure surfaces here as a
    /// [`StreamError`] inside the `anyhow::Error`.
    pub fn stop(mut self) -> Result<SessionSummary> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.join_worker()
    }

    /// Wait for the worker to stop on its own (end of stream or fatal failure).
    pub fn wait(mut self) -> Result<SessionSummary> {
        self.join_worker()
    }

    fn join_worker(&mut self) -> Result<SessionSummary> {
        let join = self
            .join
            .take()
            .ok_or_else(|| anyhow!("occupancy worker already joined"))?;
        join.join()
            .map_err(|_| anyhow!("occupancy worker thread panicked"))?
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            self.shutdown.store(true, Ordering::SeqCst);
            let _ = join.join();
        }
    }
}

// -------------------- Worker --------------------

struct Worker {
    detector: LotDetector,
    source: Box<dyn FrameSource>,
    options: SessionOptions,
    shutdown: Arc<AtomicBool>,
    events: Sender<SessionEvent>,
}

impl Worker {
    fn run(mut self) -> Result<SessionSummary> {
        let result = self.run_loop();
        self.source.release();
        let stats = self.source.stats();
        log::info!(
            "occupancy worker exiting: frames={} failures={} reconnects={}",
            stats.frames_captured,
            stats.read_failures,
            stats.reconnects
        );
        self.emit(SessionEvent::Stopped);
        result
    }

    fn run_loop(&mut self) -> Result<SessionSummary> {
        let interval = self
            .options
            .target_fps
            .map(|fps| Duration::from_secs_f64(1.0 / fps));
        let max_retries = self.options.retry.max_retries;

        let mut summary = SessionSummary {
            reason: StopReason::Requested,
            frames_processed: 0,
            frames_skipped: 0,
            frames_passed_over: 0,
            read_failures: 0,
            reconnects: 0,
        };
        let detection_interval = u64::from(self.options.detection_interval);
        let mut frames_read = 0u64;
        let mut consecutive_failures = 0u32;
        let mut next_due = Instant::now();

        self.emit(SessionEvent::Started);
        log::info!("occupancy worker started");

        loop {
            if self.stop_requested() {
                summary.reason = StopReason::Requested;
                return Ok(summary);
            }

            match self.source.next_frame() {
                Ok(Some(frame)) => {
                    consecutive_failures = 0;
                    let analyse = frames_read % detection_interval == 0;
                    frames_read += 1;
                    match analyse.then(|| self.detector.process(&frame)) {
                        None => summary.frames_passed_over += 1,
                        Some(Ok(outcome)) => {
                            summary.frames_processed += 1;
                            for t in outcome.transitions {
                                self.emit(SessionEvent::Transition {
                                    id: t.id,
                                    status: t.status,
                                    pts: t.pts,
                                });
                            }
                        }
                        Some(Err(err)) => {
                            summary.frames_skipped += 1;
                            log::warn!("skipping frame at pts {:.3}: {:#}", frame.pts, err);
                            self.emit(SessionEvent::FrameSkipped {
                                error: format!("{:#}", err),
                            });
                        }
                    }
                    drop(frame);

                    if let Some(interval) = interval {
                        next_due += interval;
                        let now = Instant::now();
                        if next_due > now {
                            self.sleep(next_due - now);
                        } else {
                            // Behind schedule: process the next frame immediately.
                            next_due = now;
                        }
                    }
                }
                Ok(None) => {
                    log::info!("frame source reached end of stream");
                    self.emit(SessionEvent::EndOfStream);
                    summary.reason = StopReason::EndOfStream;
                    return Ok(summary);
                }
                Err(err) => {
                    consecutive_failures += 1;
                    summary.read_failures += 1;
                    let error = format!("{:#}", err);
                    self.emit(SessionEvent::ReadFailed {
                        attempt: consecutive_failures,
                        error: error.clone(),
                    });

                    if consecutive_failures > max_retries {
                        log::error!(
                            "frame source failed {} consecutive reads, giving up: {}",
                            consecutive_failures,
                            error
                        );
                        self.source.release();
                        let failure = StreamError::RetriesExhausted {
                            attempts: consecutive_failures,
                            last_error: error,
                        };
                        self.emit(SessionEvent::StreamFailed {
                            error: failure.to_string(),
                        });
                        return Err(failure.into());
                    }

                    let backoff = self.options.retry.backoff(consecutive_failures);
                    log::warn!(
                        "frame read failed (attempt {}/{}), retrying in {:?}: {}",
                        consecutive_failures,
                        max_retries,
                        backoff,
                        error
                    );
                    self.sleep(backoff);
                    if self.stop_requested() {
                        continue;
                    }
                    match self.source.reconnect() {
                        Ok(()) => {
                            summary.reconnects += 1;
                            self.emit(SessionEvent::Reconnected);
                        }
                        Err(err) => log::warn!("reconnect failed: {:#}", err),
                    }
                    next_due = Instant::now();
                }
            }
        }
    }

    fn stop_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sleep up to `duration`, waking early on a stop request.
    fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            if self.stop_requested() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine; the snapshot reader is the primary interface.
        let _ = self.events.send(event);
    }
}
