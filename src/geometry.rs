//! Parking-space geometry: the startup document and the immutable store built from it.
//!
//! The document shape is fixed:
//!
//! ```text
//! { frame_dimensions: { width, height },
//!   spots: [ { id, coordinates: [[x, y] x 4] } ] }
//! ```
//!
//! It is read from JSON, YAML or TOML depending on the file extension, and written back in
//! the same format. Integer coordinates survive a save/load cycle unchanged.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

/// Number of corners every space polygon must have.
pub const POLYGON_POINTS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameDimensions {
    pub width: u32,
    pub height: u32,
}

/// Integer image point, serialized as `[x, y]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl From<[i32; 2]> for Point {
    fn from([x, y]: [i32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [i32; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// Axis-aligned pixel rectangle. `w`/`h` count pixels, so a rectangle spanning
/// columns 0..=10 has `w == 11`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }
}

// ----------------------------------------------------------------------------
// Document (wire format)
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryDocument {
    pub frame_dimensions: FrameDimensions,
    pub spots: Vec<SpotRecord>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotRecord {
    pub id: u32,
    pub coordinates: Vec<Point>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
    Toml,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Result<Self, GeometryError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "json" => Ok(Self::Json),
            "yml" | "yaml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            _ => Err(GeometryError::UnsupportedFormat(path.display().to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Toml => "toml",
        }
    }
}

impl GeometryDocument {
    pub fn parse(text: &str, format: DocumentFormat) -> Result<Self, GeometryError> {
        let parsed = match format {
            DocumentFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
            DocumentFormat::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
            DocumentFormat::Toml => toml::from_str(text).map_err(|e| e.to_string()),
        };
        parsed.map_err(|message| GeometryError::Parse {
            format: format.name(),
            message,
        })
    }

    pub fn render(&self, format: DocumentFormat) -> Result<String> {
        let text = match format {
            DocumentFormat::Json => serde_json::to_string_pretty(self)?,
            DocumentFormat::Yaml => serde_yaml::to_string(self)?,
            DocumentFormat::Toml => toml::to_string(self)?,
        };
        Ok(text)
    }
}

// ----------------------------------------------------------------------------
// Errors
// ----------------------------------------------------------------------------

/// Why a geometry document was rejected. Every variant is fatal to session startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GeometryError {
    UnsupportedFormat(String),
    Parse { format: &'static str, message: String },
    InvalidDimensions { width: u32, height: u32 },
    WrongPointCount { id: u32, found: usize },
    DuplicateId(u32),
    OutOfFrame { id: u32, point: Point },
    SelfIntersecting { id: u32 },
}

impl std::fmt::Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedFormat(path) => {
                write!(f, "unsupported geometry document format: {path}")
            }
            Self::Parse { format, message } => {
                write!(f, "invalid {format} geometry document: {message}")
            }
            Self::InvalidDimensions { width, height } => {
                write!(f, "frame dimensions must be positive, got {width}x{height}")
            }
            Self::WrongPointCount { id, found } => write!(
                f,
                "space {id}: expected {POLYGON_POINTS} coordinates, found {found}"
            ),
            Self::DuplicateId(id) => write!(f, "space id {id} appears more than once"),
            Self::OutOfFrame { id, point } => write!(
                f,
                "space {id}: point ({}, {}) lies outside the reference frame",
                point.x, point.y
            ),
            Self::SelfIntersecting { id } => write!(f, "space {id}: polygon is self-intersecting"),
        }
    }
}

impl std::error::Error for GeometryError {}

// ----------------------------------------------------------------------------
// SpaceGeometry / GeometryStore
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SpaceGeometry {
    pub id: u32,
    /// Corners in authoring order (clockwise from top-left).
    pub polygon: [Point; POLYGON_POINTS],
}

impl SpaceGeometry {
    /// Twice the signed shoelace area. Positive for clockwise order in image coordinates.
    pub fn doubled_signed_area(&self) -> i64 {
        let mut acc = 0i64;
        for i in 0..POLYGON_POINTS {
            let a = self.polygon[i];
            let b = self.polygon[(i + 1) % POLYGON_POINTS];
            acc += a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64;
        }
        acc
    }

    /// Enclosed area in square pixels.
    pub fn area(&self) -> f64 {
        self.doubled_signed_area().unsigned_abs() as f64 / 2.0
    }

    pub fn is_degenerate(&self) -> bool {
        self.doubled_signed_area() == 0
    }

    /// Pixel-inclusive bounding rectangle. Coordinates are validated non-negative at load.
    pub fn bounding_rect(&self) -> Rect {
        let min_x = self.polygon.iter().map(|p| p.x).min().unwrap_or(0);
        let max_x = self.polygon.iter().map(|p| p.x).max().unwrap_or(0);
        let min_y = self.polygon.iter().map(|p| p.y).min().unwrap_or(0);
        let max_y = self.polygon.iter().map(|p| p.y).max().unwrap_or(0);
        Rect {
            x: min_x.max(0) as u32,
            y: min_y.max(0) as u32,
            w: (max_x - min_x + 1) as u32,
            h: (max_y - min_y + 1) as u32,
        }
    }

    /// True when a polygon with non-zero area is not simple: two opposite edges cross,
    /// a vertex touches an edge it does not belong to, or adjacent edges fold back
    /// over each other. Zero-area polygons are never reported here; they are handled
    /// as degenerate.
    pub fn is_self_intersecting(&self) -> bool {
        if self.is_degenerate() {
            return false;
        }
        let p = &self.polygon;
        if segments_cross(p[0], p[1], p[2], p[3]) || segments_cross(p[1], p[2], p[3], p[0]) {
            return true;
        }
        // Vertex i belongs to edges (i-1, i) and (i, i+1); test it against the other two.
        (0..POLYGON_POINTS).any(|i| {
            let next = p[(i + 1) % POLYGON_POINTS];
            let opposite = p[(i + 2) % POLYGON_POINTS];
            let prev = p[(i + 3) % POLYGON_POINTS];
            on_segment(p[i], next, opposite) || on_segment(p[i], opposite, prev)
        })
    }
}

fn orientation(a: Point, b: Point, c: Point) -> i64 {
    (b.x as i64 - a.x as i64) * (c.y as i64 - a.y as i64)
        - (b.y as i64 - a.y as i64) * (c.x as i64 - a.x as i64)
}

fn segments_cross(a: Point, b: Point, c: Point, d: Point) -> bool {
    let o1 = orientation(a, b, c).signum();
    let o2 = orientation(a, b, d).signum();
    let o3 = orientation(c, d, a).signum();
    let o4 = orientation(c, d, b).signum();
    o1 * o2 < 0 && o3 * o4 < 0
}

/// True when `v` lies on the closed segment `a..b`.
fn on_segment(v: Point, a: Point, b: Point) -> bool {
    orientation(a, b, v) == 0
        && v.x >= a.x.min(b.x)
        && v.x <= a.x.max(b.x)
        && v.y >= a.y.min(b.y)
        && v.y <= a.y.max(b.y)
}

/// Immutable set of space polygons and the frame size they were authored against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeometryStore {
    dimensions: FrameDimensions,
    spaces: Vec<SpaceGeometry>,
}

impl GeometryStore {
    /// Validate a parsed document. Degenerate (zero-area) polygons are accepted here and
    /// flagged later by the mask cache; everything else malformed is rejected.
    pub fn from_document(doc: GeometryDocument) -> Result<Self, GeometryError> {
        let dims = doc.frame_dimensions;
        if dims.width == 0 || dims.height == 0 {
            return Err(GeometryError::InvalidDimensions {
                width: dims.width,
                height: dims.height,
            });
        }

        let mut seen = HashSet::new();
        let mut spaces = Vec::with_capacity(doc.spots.len());
        for spot in doc.spots {
            if !seen.insert(spot.id) {
                return Err(GeometryError::DuplicateId(spot.id));
            }
            let polygon: [Point; POLYGON_POINTS] =
                spot.coordinates.as_slice().try_into().map_err(|_| {
                    GeometryError::WrongPointCount {
                        id: spot.id,
                        found: spot.coordinates.len(),
                    }
                })?;
            if let Some(point) = polygon.iter().find(|p| {
                p.x < 0 || p.y < 0 || p.x as u32 >= dims.width || p.y as u32 >= dims.height
            }) {
                return Err(GeometryError::OutOfFrame {
                    id: spot.id,
                    point: *point,
                });
            }
            let space = SpaceGeometry {
                id: spot.id,
                polygon,
            };
            if space.is_self_intersecting() {
                return Err(GeometryError::SelfIntersecting { id: spot.id });
            }
            spaces.push(space);
        }

        Ok(Self {
            dimensions: dims,
            spaces,
        })
    }

    pub fn parse(text: &str, format: DocumentFormat) -> Result<Self, GeometryError> {
        Self::from_document(GeometryDocument::parse(text, format)?)
    }

    /// Load and validate a geometry document from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let format = DocumentFormat::from_path(path)?;
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read geometry document {}", path.display()))?;
        let store = Self::parse(&raw, format)?;
        log::info!(
            "loaded {} spaces ({}x{}) from {}",
            store.spaces.len(),
            store.dimensions.width,
            store.dimensions.height,
            path.display()
        );
        Ok(store)
    }

    /// Write the geometry in the format implied by the path extension.
    pub fn save(&self, path: &Path) -> Result<()> {
        let format = DocumentFormat::from_path(path)?;
        let text = self.to_document().render(format)?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write geometry document {}", path.display()))?;
        Ok(())
    }

    pub fn to_document(&self) -> GeometryDocument {
        GeometryDocument {
            frame_dimensions: self.dimensions,
            spots: self
                .spaces
                .iter()
                .map(|s| SpotRecord {
                    id: s.id,
                    coordinates: s.polygon.to_vec(),
                })
                .collect(),
        }
    }

    pub fn dimensions(&self) -> FrameDimensions {
        self.dimensions
    }

    pub fn spaces(&self) -> &[SpaceGeometry] {
        &self.spaces
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    /// SHA-256 over dimensions, ids and corners. Equal fingerprints mean equal geometry.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.dimensions.width.to_le_bytes());
        hasher.update(self.dimensions.height.to_le_bytes());
        for space in &self.spaces {
            hasher.update(space.id.to_le_bytes());
            for p in &space.polygon {
                hasher.update(p.x.to_le_bytes());
                hasher.update(p.y.to_le_bytes());
            }
        }
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(spots: Vec<(u32, Vec<[i32; 2]>)>) -> GeometryDocument {
        GeometryDocument {
            frame_dimensions: FrameDimensions {
                width: 100,
                height: 100,
            },
            spots: spots
                .into_iter()
                .map(|(id, pts)| SpotRecord {
                    id,
                    coordinates: pts.into_iter().map(Point::from).collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn accepts_clockwise_square() {
        let store =
            GeometryStore::from_document(doc(vec![(0, vec![[0, 0], [10, 0], [10, 10], [0, 10]])]))
                .expect("valid square");
        let space = &store.spaces()[0];
        assert_eq!(space.area(), 100.0);
        assert!(space.doubled_signed_area() > 0);
        assert_eq!(
            space.bounding_rect(),
            Rect {
                x: 0,
                y: 0,
                w: 11,
                h: 11
            }
        );
    }

    #[test]
    fn rejects_wrong_point_count() {
        let err = GeometryStore::from_document(doc(vec![(3, vec![[0, 0], [10, 0], [10, 10]])]))
            .unwrap_err();
        assert_eq!(err, GeometryError::WrongPointCount { id: 3, found: 3 });
    }

    #[test]
    fn rejects_bow_tie() {
        let err =
            GeometryStore::from_document(doc(vec![(1, vec![[0, 0], [10, 10], [10, 0], [0, 10]])]))
                .unwrap_err();
        assert_eq!(err, GeometryError::SelfIntersecting { id: 1 });
    }

    #[test]
    fn rejects_folded_and_touching_polygons() {
        // Third vertex doubles back onto the first edge.
        let folded = vec![[0, 0], [10, 0], [5, 0], [5, 10]];
        // Third vertex sits on the first edge.
        let touching = vec![[0, 0], [20, 0], [10, 0], [0, 20]];
        // Fourth vertex rests on the second edge.
        let pinched = vec![[0, 0], [10, 0], [10, 10], [10, 5]];
        for (id, pts) in [(1, folded), (2, touching), (3, pinched)] {
            let space = SpaceGeometry {
                id,
                polygon: [pts[0], pts[1], pts[2], pts[3]].map(Point::from),
            };
            assert!(!space.is_degenerate(), "space {id} has area");
            assert_eq!(
                GeometryStore::from_document(doc(vec![(id, pts)])).unwrap_err(),
                GeometryError::SelfIntersecting { id }
            );
        }
    }

    #[test]
    fn rejects_duplicate_ids_and_out_of_frame_points() {
        let square = vec![[0, 0], [10, 0], [10, 10], [0, 10]];
        let err = GeometryStore::from_document(doc(vec![(1, square.clone()), (1, square)]))
            .unwrap_err();
        assert_eq!(err, GeometryError::DuplicateId(1));

        let err = GeometryStore::from_document(doc(vec![(
            2,
            vec![[0, 0], [100, 0], [100, 10], [0, 10]],
        )]))
        .unwrap_err();
        assert!(matches!(err, GeometryError::OutOfFrame { id: 2, .. }));
    }

    #[test]
    fn collinear_polygon_is_degenerate_not_rejected() {
        let store =
            GeometryStore::from_document(doc(vec![(7, vec![[0, 5], [5, 5], [10, 5], [20, 5]])]))
                .expect("degenerate polygons load");
        assert!(store.spaces()[0].is_degenerate());
    }

    #[test]
    fn non_numeric_coordinates_fail_to_parse() {
        let text = r#"{"frame_dimensions":{"width":10,"height":10},
            "spots":[{"id":0,"coordinates":[["a",0],[1,0],[1,1],[0,1]]}]}"#;
        let err = GeometryStore::parse(text, DocumentFormat::Json).unwrap_err();
        assert!(matches!(err, GeometryError::Parse { format: "json", .. }));
    }

    #[test]
    fn fingerprint_tracks_geometry_changes() {
        let a = GeometryStore::from_document(doc(vec![(0, vec![[0, 0], [10, 0], [10, 10], [0, 10]])]))
            .unwrap();
        let b = GeometryStore::from_document(doc(vec![(0, vec![[0, 0], [10, 0], [10, 12], [0, 10]])]))
            .unwrap();
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
