//! Parking-space occupancy kernel
//!
//! This crate turns a fixed-camera video feed into a live occupancy status for a set of
//! hand-marked parking-space polygons.
//!
//! # Architecture
//!
//! Per frame, strictly in order:
//!
//! 1. **Geometry**: immutable space polygons and the frame size they were drawn on.
//! 2. **Masks**: per-space bounding rectangle plus interior bitmap, built once.
//! 3. **Classification**: raw occupied/free per space from masked pixel analysis.
//! 4. **Debouncing**: raw verdicts become confirmed status only after persisting for a
//!    stream-time delay.
//! 5. **Aggregation**: confirmed status is counted and published as an immutable
//!    snapshot.
//!
//! # Module Structure
//!
//! - `geometry`: geometry documents (JSON/YAML/TOML) and validation
//! - `frame`: RGB frames and intensity rasters
//! - `detect`: masks, background model, strategies, debouncer
//! - `status`: snapshots and their publication
//! - `ingest`: frame sources
//! - `session`: the worker thread driving a `LotDetector` from a `FrameSource`
//! - `config`: daemon configuration

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod session;
pub mod status;

pub use detect::{
    BackgroundSettings, OccupancyClassifier, OccupancyStrategy, OccupancyThresholds,
    RegionMask, RegionMaskCache, SpaceScore, StrategyKind, TemporalDebouncer,
};
pub use frame::{Frame, GrayImage};
pub use geometry::{
    DocumentFormat, FrameDimensions, GeometryDocument, GeometryError, GeometryStore, Point,
    Rect, SpaceGeometry,
};
pub use ingest::{
    open_source, FrameSource, ScriptStep, ScriptedSource, SourceSettings, SourceStats,
    SyntheticSource,
};
pub use session::{
    RetryPolicy, Session, SessionEvent, SessionHandle, SessionOptions, SessionSummary,
    StopReason, StreamError,
};
pub use status::{
    ParkingLotSnapshot, SnapshotPublisher, SnapshotReader, SpaceReport, SpaceStatus,
    StatusAggregator,
};

/// Default confirmation delay in stream seconds.
pub const DEFAULT_DETECT_DELAY_SECS: f64 = 1.0;

// -------------------- Detector Settings --------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub strategy: StrategyKind,
    /// Stream seconds a raw verdict must persist before it is confirmed.
    pub detect_delay_secs: f64,
    pub thresholds: OccupancyThresholds,
    pub background: BackgroundSettings,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            detect_delay_secs: DEFAULT_DETECT_DELAY_SECS,
            thresholds: OccupancyThresholds::default(),
            background: BackgroundSettings::default(),
        }
    }
}

impl DetectorSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.detect_delay_secs.is_finite() || self.detect_delay_secs < 0.0 {
            return Err(anyhow!("detect_delay_secs must be a non-negative number"));
        }
        self.thresholds.validate()?;
        self.background.validate()?;
        Ok(())
    }
}

// -------------------- Lot Detector --------------------

/// A confirmed status change, reported once when it is committed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpaceTransition {
    pub id: u32,
    pub status: SpaceStatus,
    pub pts: f64,
}

/// Result of processing one frame.
#[derive(Clone, Debug)]
pub struct FrameOutcome {
    pub snapshot: Arc<ParkingLotSnapshot>,
    pub transitions: Vec<SpaceTransition>,
}

/// Per-camera occupancy engine.
///
/// Owns every piece of mutable detection state (background models, debounce state) for
/// one stream. Not shared: a [`Session`] moves it onto its worker thread.
pub struct LotDetector {
    geometry: Arc<GeometryStore>,
    settings: DetectorSettings,
    masks: RegionMaskCache,
    classifier: OccupancyClassifier,
    debouncer: TemporalDebouncer,
    aggregator: StatusAggregator,
    publisher: SnapshotPublisher,
    frames_processed: u64,
}

impl LotDetector {
    pub fn new(geometry: GeometryStore, settings: DetectorSettings) -> Result<Self> {
        settings.validate()?;
        let masks = RegionMaskCache::from_geometry(&geometry);
        let classifier = OccupancyClassifier::new(
            settings.strategy,
            settings.thresholds.clone(),
            settings.background.clone(),
            &masks,
        );
        let debouncer = TemporalDebouncer::new(masks.len(), settings.detect_delay_secs);
        let aggregator = aggregator_for(&masks);
        let publisher = SnapshotPublisher::new(aggregator.initial());

        log::info!(
            "lot detector ready: {} spaces ({} degenerate), strategy={}, delay={}s",
            masks.len(),
            masks.degenerate_count(),
            settings.strategy.name(),
            settings.detect_delay_secs
        );

        Ok(Self {
            geometry: Arc::new(geometry),
            settings,
            masks,
            classifier,
            debouncer,
            aggregator,
            publisher,
            frames_processed: 0,
        })
    }

    pub fn geometry(&self) -> &GeometryStore {
        &self.geometry
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    pub fn masks(&self) -> &RegionMaskCache {
        &self.masks
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Handle for observers; valid for the detector's lifetime and beyond.
    pub fn reader(&self) -> SnapshotReader {
        self.publisher.reader()
    }

    pub fn latest(&self) -> Arc<ParkingLotSnapshot> {
        self.publisher.latest()
    }

    /// Process one frame and publish the resulting snapshot.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<Arc<ParkingLotSnapshot>> {
        self.process(frame).map(|outcome| outcome.snapshot)
    }

    /// Like [`process_frame`](Self::process_frame), also reporting committed transitions.
    ///
    /// On error nothing is published and debounce state is untouched; the previous
    /// snapshot stays authoritative.
    pub fn process(&mut self, frame: &Frame) -> Result<FrameOutcome> {
        let resized = frame.resized(self.geometry.dimensions())?;
        let frame = resized.as_ref().unwrap_or(frame);
        let pts = frame.pts;

        let mut raw = Vec::with_capacity(self.masks.len());
        for (index, mask) in self.masks.masks().iter().enumerate() {
            if mask.degenerate {
                raw.push(None);
                continue;
            }
            let roi = frame.luma_region(mask.rect);
            let score = self
                .classifier
                .classify_space(index, &roi, mask)
                .map_err(|e| e.context(format!("space {} classification failed", mask.space_id)))?;
            if let Some(score) = &score {
                log::debug!(
                    "space {} pts={:.3} raw={} ratio={:.3} edges={:.3} contour={:.3} texture={:.3}",
                    mask.space_id,
                    pts,
                    score.occupied,
                    score.occupation_ratio,
                    score.edge_density,
                    score.contour_aspect,
                    score.texture_energy
                );
            }
            raw.push(score.map(|s| s.occupied));
        }

        let mut transitions = Vec::new();
        for (index, verdict) in raw.into_iter().enumerate() {
            let Some(occupied) = verdict else { continue };
            if let Some(t) = self.debouncer.observe(index, occupied, pts) {
                let id = self.masks.masks()[index].space_id;
                let status = if t.occupied {
                    SpaceStatus::Occupied
                } else {
                    SpaceStatus::Available
                };
                log::info!("space {} -> {} at pts {:.3}", id, status, t.at);
                transitions.push(SpaceTransition {
                    id,
                    status,
                    pts: t.at,
                });
            }
        }

        self.frames_processed += 1;
        let debouncer = &self.debouncer;
        let snapshot = self.aggregator.aggregate(
            |index| debouncer.is_confirmed_occupied(index),
            self.frames_processed,
            Some(pts),
        );
        let snapshot = self.publisher.publish(snapshot);
        Ok(FrameOutcome {
            snapshot,
            transitions,
        })
    }

    /// Swap in new geometry. Returns false (and keeps all learnt state) when the geometry
    /// is unchanged; otherwise every space starts over.
    pub fn replace_geometry(&mut self, geometry: GeometryStore) -> bool {
        if !self.masks.build(&geometry) {
            return false;
        }
        self.classifier.rebuild(&self.masks);
        self.debouncer.resize(self.masks.len());
        self.aggregator = aggregator_for(&self.masks);
        self.geometry = Arc::new(geometry);
        let snapshot = self.aggregator.aggregate(|_| false, self.frames_processed, None);
        self.publisher.publish(snapshot);
        log::info!("geometry replaced: {} spaces", self.masks.len());
        true
    }

    /// Drop all learnt background and debounce state, keeping geometry.
    pub fn reset(&mut self) {
        self.classifier.reset_all();
        self.debouncer.reset();
        let snapshot = self.aggregator.aggregate(|_| false, self.frames_processed, None);
        self.publisher.publish(snapshot);
    }

    /// Drop the learnt state of one space; the others keep theirs. Returns false when no
    /// space has that id.
    pub fn reset_space(&mut self, id: u32) -> bool {
        let Some(index) = self.masks.masks().iter().position(|m| m.space_id == id) else {
            return false;
        };
        self.classifier.reset_space(index);
        self.debouncer.reset_space(index);
        let debouncer = &self.debouncer;
        let snapshot = self.aggregator.aggregate(
            |i| debouncer.is_confirmed_occupied(i),
            self.frames_processed,
            self.publisher.latest().pts(),
        );
        self.publisher.publish(snapshot);
        log::info!("space {} reset", id);
        true
    }
}

fn aggregator_for(masks: &RegionMaskCache) -> StatusAggregator {
    StatusAggregator::new(
        masks.masks().iter().map(|m| m.space_id).collect(),
        masks.masks().iter().map(|m| m.degenerate).collect(),
    )
}

// -------------------- Conformance Tests --------------------
