//! occupancyd - parking-space occupancy daemon
//!
//! This daemon:
//! 1. Loads configuration (OCCUPANCY_CONFIG + OCCUPANCY_* overrides)
//! 2. Loads and validates the space geometry document
//! 3. Opens the configured frame source (stub://, rtsp://, or a local file)
//! 4. Runs the detection worker until Ctrl-C or a fatal stream failure
//! 5. Logs status transitions and a periodic snapshot line

use anyhow::Result;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use occupancy_kernel::config::OccupancydConfig;
use occupancy_kernel::{open_source, GeometryStore, LotDetector, Session, SessionEvent};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = OccupancydConfig::load()?;
    let geometry = GeometryStore::load(&cfg.geometry_path)?;
    let detector = LotDetector::new(geometry, cfg.detector.clone())?;
    let source = open_source(&cfg.source)?;

    log::info!(
        "occupancyd {} starting: source={} fps={} strategy={}",
        env!("CARGO_PKG_VERSION"),
        cfg.source.url,
        cfg.source.target_fps,
        cfg.detector.strategy.name()
    );

    let handle = Session::new(detector, source, cfg.session_options()).start()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    let mut last_snapshot_log = Instant::now();
    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received, stopping worker...");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        for event in handle.events().try_iter() {
            match event {
                SessionEvent::Transition { id, status, pts } => {
                    log::info!("space {} is now {} (pts {:.2})", id, status, pts);
                }
                SessionEvent::Reconnected => log::info!("frame source reconnected"),
                SessionEvent::StreamFailed { error } => log::error!("stream failed: {}", error),
                other => log::debug!("session event: {:?}", other),
            }
        }

        if !cfg.snapshot_log_interval.is_zero()
            && last_snapshot_log.elapsed() >= cfg.snapshot_log_interval
        {
            let snapshot = handle.latest();
            log::info!(
                "lot status: {} available, {} occupied, {} total (frame {})",
                snapshot.available(),
                snapshot.occupied(),
                snapshot.total(),
                snapshot.sequence()
            );
            last_snapshot_log = Instant::now();
        }

        if handle.is_finished() {
            break;
        }
    }

    let summary = handle.stop()?;
    log::info!(
        "occupancyd stopped ({:?}): processed={} skipped={} passed_over={} read_failures={}",
        summary.reason,
        summary.frames_processed,
        summary.frames_skipped,
        summary.frames_passed_over,
        summary.read_failures
    );
    Ok(())
}
