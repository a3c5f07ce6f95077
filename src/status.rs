//! Confirmed status aggregation and snapshot publication.
//!
//! The worker owns a [`SnapshotPublisher`]; any number of [`SnapshotReader`] clones
//! observe the latest published [`ParkingLotSnapshot`]. Publication swaps an `Arc` under
//! a write lock, so readers either see the previous snapshot or the new one, never a
//! partially updated vector. Published snapshots are never mutated.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Confirmed status of one space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceStatus {
    Available,
    Occupied,
    /// Degenerate geometry; never classified.
    Unknown,
}

impl SpaceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Occupied => "occupied",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SpaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceReport {
    pub id: u32,
    pub status: SpaceStatus,
}

/// Immutable lot status computed from one frame.
///
/// Serializes as `{total_spaces, available_spaces, occupied_spaces, spaces}`; the frame
/// sequence number and stream timestamp are accessor-only.
///
/// Counts are derived from the space list and cannot be edited:
///
/// ```compile_fail,E0616
/// fn bump(snapshot: &mut occupancy_kernel::ParkingLotSnapshot) {
///     snapshot.available += 1;
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParkingLotSnapshot {
    #[serde(rename = "total_spaces")]
    total: usize,
    #[serde(rename = "available_spaces")]
    available: usize,
    #[serde(rename = "occupied_spaces")]
    occupied: usize,
    spaces: Vec<SpaceReport>,
    #[serde(skip)]
    sequence: u64,
    #[serde(skip)]
    pts: Option<f64>,
}

impl ParkingLotSnapshot {
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn available(&self) -> usize {
        self.available
    }

    pub fn occupied(&self) -> usize {
        self.occupied
    }

    pub fn unknown(&self) -> usize {
        self.total - self.available - self.occupied
    }

    pub fn spaces(&self) -> &[SpaceReport] {
        &self.spaces
    }

    pub fn status_of(&self, id: u32) -> Option<SpaceStatus> {
        self.spaces.iter().find(|s| s.id == id).map(|s| s.status)
    }

    /// Number of frames processed before this snapshot; 0 for the initial snapshot.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Stream timestamp of the frame this snapshot was computed from.
    pub fn pts(&self) -> Option<f64> {
        self.pts
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Builds snapshots from the confirmed status vector.
#[derive(Clone, Debug)]
pub struct StatusAggregator {
    ids: Vec<u32>,
    degenerate: Vec<bool>,
}

impl StatusAggregator {
    /// `ids` and `degenerate` are index-aligned with the mask cache.
    pub fn new(ids: Vec<u32>, degenerate: Vec<bool>) -> Self {
        debug_assert_eq!(ids.len(), degenerate.len());
        Self { ids, degenerate }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Snapshot with every classifiable space available.
    pub fn initial(&self) -> ParkingLotSnapshot {
        self.aggregate(|_| false, 0, None)
    }

    /// Build a snapshot; `confirmed(index)` reports the confirmed occupancy of a space.
    pub fn aggregate(
        &self,
        confirmed: impl Fn(usize) -> bool,
        sequence: u64,
        pts: Option<f64>,
    ) -> ParkingLotSnapshot {
        let spaces: Vec<SpaceReport> = self
            .ids
            .iter()
            .zip(&self.degenerate)
            .enumerate()
            .map(|(index, (&id, &degenerate))| SpaceReport {
                id,
                status: if degenerate {
                    SpaceStatus::Unknown
                } else if confirmed(index) {
                    SpaceStatus::Occupied
                } else {
                    SpaceStatus::Available
                },
            })
            .collect();

        let occupied = spaces
            .iter()
            .filter(|s| s.status == SpaceStatus::Occupied)
            .count();
        let unknown = spaces
            .iter()
            .filter(|s| s.status == SpaceStatus::Unknown)
            .count();
        let total = spaces.len();

        ParkingLotSnapshot {
            total,
            available: total - occupied - unknown,
            occupied,
            spaces,
            sequence,
            pts,
        }
    }
}

// ----------------------------------------------------------------------------
// Publication
// ----------------------------------------------------------------------------

/// Write side of the latest-snapshot cell. Held by the worker only.
pub struct SnapshotPublisher {
    cell: Arc<RwLock<Arc<ParkingLotSnapshot>>>,
}

/// Read side of the latest-snapshot cell. Cheap to clone.
///
/// Observers hold this handle only; it cannot publish.
///
/// ```compile_fail,E0599
/// use occupancy_kernel::{SnapshotReader, StatusAggregator};
///
/// fn overwrite(reader: &SnapshotReader) {
///     reader.publish(StatusAggregator::new(vec![1], vec![false]).initial());
/// }
/// ```
#[derive(Clone)]
pub struct SnapshotReader {
    cell: Arc<RwLock<Arc<ParkingLotSnapshot>>>,
}

impl SnapshotPublisher {
    pub fn new(initial: ParkingLotSnapshot) -> Self {
        Self {
            cell: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    pub fn publish(&self, snapshot: ParkingLotSnapshot) -> Arc<ParkingLotSnapshot> {
        let snapshot = Arc::new(snapshot);
        // A poisoned lock only means a reader panicked; the slot itself is always whole.
        let mut slot = match self.cell.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Arc::clone(&snapshot);
        snapshot
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            cell: Arc::clone(&self.cell),
        }
    }

    pub fn latest(&self) -> Arc<ParkingLotSnapshot> {
        self.reader().latest()
    }
}

impl SnapshotReader {
    pub fn latest(&self) -> Arc<ParkingLotSnapshot> {
        match self.cell.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}

impl std::fmt::Debug for SnapshotReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let latest = self.latest();
        f.debug_struct("SnapshotReader")
            .field("sequence", &latest.sequence())
            .finish_non_exhaustive()
    }
}
