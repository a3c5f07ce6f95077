//! Per-space region masks.
//!
//! Each space polygon becomes a pixel-inclusive bounding rectangle plus a row-major
//! interior bitmap in rectangle-local coordinates. Masks are built once per geometry and
//! shared read-only by every frame.

use crate::geometry::{GeometryStore, Point, Rect, SpaceGeometry, POLYGON_POINTS};

/// Bounding rectangle and interior bitmap of one space.
#[derive(Clone, Debug)]
pub struct RegionMask {
    pub space_id: u32,
    pub rect: Rect,
    /// `rect.w * rect.h` entries, true inside the polygon (boundary included).
    /// Empty for degenerate spaces.
    pub bitmap: Vec<bool>,
    /// Enclosed polygon area (shoelace), the denominator of occupation ratios.
    pub area: f64,
    /// Zero-area polygon: never classified, always reported unknown.
    pub degenerate: bool,
}

impl RegionMask {
    pub fn build(space: &SpaceGeometry) -> Self {
        let rect = space.bounding_rect();
        let area = space.area();
        if space.is_degenerate() || rect.area() == 0 {
            return Self {
                space_id: space.id,
                rect,
                bitmap: Vec::new(),
                area: 0.0,
                degenerate: true,
            };
        }
        Self {
            space_id: space.id,
            rect,
            bitmap: rasterize(&space.polygon, rect),
            area,
            degenerate: false,
        }
    }

    /// Number of pixels marked inside the polygon.
    pub fn interior_pixels(&self) -> usize {
        self.bitmap.iter().filter(|&&inside| inside).count()
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        self.bitmap
            .get(y * self.rect.w as usize + x)
            .copied()
            .unwrap_or(false)
    }
}

/// Scanline fill of the polygon translated to `rect`-local coordinates, followed by the
/// outline so that boundary pixels are always part of the mask.
fn rasterize(polygon: &[Point; POLYGON_POINTS], rect: Rect) -> Vec<bool> {
    let w = rect.w as usize;
    let h = rect.h as usize;
    let mut bitmap = vec![false; w * h];
    let local: Vec<(f64, f64)> = polygon
        .iter()
        .map(|p| ((p.x - rect.x as i32) as f64, (p.y - rect.y as i32) as f64))
        .collect();

    let mut crossings = Vec::with_capacity(POLYGON_POINTS);
    for y in 0..h {
        let yc = y as f64;
        crossings.clear();
        for i in 0..POLYGON_POINTS {
            let (ax, ay) = local[i];
            let (bx, by) = local[(i + 1) % POLYGON_POINTS];
            // Half-open rule so shared vertices are counted once.
            if (ay <= yc && yc < by) || (by <= yc && yc < ay) {
                crossings.push(ax + (yc - ay) * (bx - ax) / (by - ay));
            }
        }
        crossings.sort_by(f64::total_cmp);
        for pair in crossings.chunks_exact(2) {
            let start = pair[0].ceil().max(0.0) as usize;
            let end = (pair[1].floor() as i64).min(w as i64 - 1);
            if end < start as i64 {
                continue;
            }
            for x in start..=end as usize {
                bitmap[y * w + x] = true;
            }
        }
    }

    for i in 0..POLYGON_POINTS {
        let a = polygon[i];
        let b = polygon[(i + 1) % POLYGON_POINTS];
        draw_line(
            &mut bitmap,
            w,
            h,
            (a.x - rect.x as i32, a.y - rect.y as i32),
            (b.x - rect.x as i32, b.y - rect.y as i32),
        );
    }

    bitmap
}

/// Bresenham line, clipped to the bitmap.
fn draw_line(bitmap: &mut [bool], w: usize, h: usize, from: (i32, i32), to: (i32, i32)) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        if x >= 0 && y >= 0 && (x as usize) < w && (y as usize) < h {
            bitmap[y as usize * w + x as usize] = true;
        }
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// Masks for every space, keyed by the geometry fingerprint they were built from.
#[derive(Debug, Default)]
pub struct RegionMaskCache {
    fingerprint: Option<[u8; 32]>,
    masks: Vec<RegionMask>,
}

impl RegionMaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_geometry(store: &GeometryStore) -> Self {
        let mut cache = Self::new();
        cache.build(store);
        cache
    }

    /// Build masks for `store`. Returns false when the cache already holds masks for
    /// identical geometry; otherwise every previous mask is replaced.
    pub fn build(&mut self, store: &GeometryStore) -> bool {
        let fingerprint = store.fingerprint();
        if self.fingerprint == Some(fingerprint) {
            return false;
        }

        self.masks = store.spaces().iter().map(RegionMask::build).collect();
        self.fingerprint = Some(fingerprint);

        for mask in self.masks.iter().filter(|m| m.degenerate) {
            log::warn!(
                "space {} has a zero-area polygon; reporting it as unknown",
                mask.space_id
            );
        }
        log::debug!(
            "built {} region masks (fingerprint {})",
            self.masks.len(),
            hex::encode(&fingerprint[..8])
        );
        true
    }

    pub fn masks(&self) -> &[RegionMask] {
        &self.masks
    }

    pub fn get(&self, index: usize) -> Option<&RegionMask> {
        self.masks.get(index)
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    pub fn degenerate_count(&self) -> usize {
        self.masks.iter().filter(|m| m.degenerate).count()
    }
}
