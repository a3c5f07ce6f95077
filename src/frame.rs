//! Frame rasters handed from sources to the detector.
//!
//! - `Frame`: owned RGB24 raster plus its stream presentation timestamp. Pixel bytes are
//!   private; the detector reads them through `luma_region`.
//! - `GrayImage`: single-channel intensity raster used for per-space analysis.
//!
//! Timestamps are stream-relative seconds (`pts`), never wall-clock time. Everything that
//! needs a notion of elapsed time downstream (debouncing) reads `pts`.

use anyhow::{anyhow, Result};

use crate::geometry::{FrameDimensions, Rect};

// ----------------------------------------------------------------------------
// Frame: owned RGB raster
// ----------------------------------------------------------------------------

/// Decoded RGB24 frame with its presentation timestamp.
///
/// Deliberately not `Clone`: a source produces a frame, the worker consumes it.
///
/// ```compile_fail,E0599
/// let frame = occupancy_kernel::Frame::filled(4, 4, [0, 0, 0], 0.0);
/// let _copy = frame.clone();
/// ```
///
/// Raw bytes stay inside the crate; only the detector reads pixels.
///
/// ```compile_fail,E0616
/// let frame = occupancy_kernel::Frame::filled(4, 4, [0, 0, 0], 0.0);
/// let _bytes = frame.data;
/// ```
///
/// ```compile_fail,E0624
/// let frame = occupancy_kernel::Frame::filled(4, 4, [0, 0, 0], 0.0);
/// let _pixel = frame.pixel(0, 0);
/// ```
pub struct Frame {
    /// Row-major RGB24 pixels, `width * height * 3` bytes.
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Presentation timestamp in stream seconds.
    pub pts: f64,
}

impl Frame {
    /// Wrap decoded RGB24 bytes. Fails when the byte length does not match the dimensions.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, pts: f64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        if !pts.is_finite() {
            return Err(anyhow!("frame timestamp must be finite"));
        }
        Ok(Self {
            data,
            width,
            height,
            pts,
        })
    }

    /// Frame of a single colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], pts: f64) -> Self {
        let pixel_count = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixel_count * 3);
        for _ in 0..pixel_count {
            data.extend_from_slice(&rgb);
        }
        Self {
            data,
            width,
            height,
            pts,
        }
    }

    pub fn dimensions(&self) -> FrameDimensions {
        FrameDimensions {
            width: self.width,
            height: self.height,
        }
    }

    /// RGB value at (x, y). Panics when out of bounds, like slice indexing.
    pub(crate) fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let offset = self.offset(x, y);
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        let offset = self.offset(x, y);
        self.data[offset..offset + 3].copy_from_slice(&rgb);
    }

    /// Paint an axis-aligned rectangle, clipped to the frame.
    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, rgb: [u8; 3]) {
        let x_end = x.saturating_add(w).min(self.width);
        let y_end = y.saturating_add(h).min(self.height);
        for yy in y.min(self.height)..y_end {
            for xx in x.min(self.width)..x_end {
                self.set_pixel(xx, yy, rgb);
            }
        }
    }

    /// Resample to `dims` with bilinear interpolation. Returns `None` when the frame
    /// already has those dimensions.
    pub fn resized(&self, dims: FrameDimensions) -> Result<Option<Frame>> {
        if dims.width == self.width && dims.height == self.height {
            return Ok(None);
        }
        if self.width == 0 || self.height == 0 || dims.width == 0 || dims.height == 0 {
            return Err(anyhow!(
                "cannot resize {}x{} frame to {}x{}",
                self.width,
                self.height,
                dims.width,
                dims.height
            ));
        }

        let sx = self.width as f32 / dims.width as f32;
        let sy = self.height as f32 / dims.height as f32;
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;
        let mut data = Vec::with_capacity(dims.width as usize * dims.height as usize * 3);

        for y in 0..dims.height {
            // Pixel-centre alignment.
            let fy = ((y as f32 + 0.5) * sy - 0.5).clamp(0.0, max_y);
            let y0 = fy.floor() as u32;
            let y1 = (y0 + 1).min(self.height - 1);
            let wy = fy - y0 as f32;
            for x in 0..dims.width {
                let fx = ((x as f32 + 0.5) * sx - 0.5).clamp(0.0, max_x);
                let x0 = fx.floor() as u32;
                let x1 = (x0 + 1).min(self.width - 1);
                let wx = fx - x0 as f32;

                let p00 = self.pixel(x0, y0);
                let p10 = self.pixel(x1, y0);
                let p01 = self.pixel(x0, y1);
                let p11 = self.pixel(x1, y1);
                for c in 0..3 {
                    let top = p00[c] as f32 * (1.0 - wx) + p10[c] as f32 * wx;
                    let bottom = p01[c] as f32 * (1.0 - wx) + p11[c] as f32 * wx;
                    data.push(clamp_to_u8(top * (1.0 - wy) + bottom * wy));
                }
            }
        }

        Ok(Some(Frame {
            data,
            width: dims.width,
            height: dims.height,
            pts: self.pts,
        }))
    }

    /// Crop `rect` and convert to intensity. Pixels of the rectangle that fall outside the
    /// frame read as zero.
    pub(crate) fn luma_region(&self, rect: Rect) -> GrayImage {
        let mut out = GrayImage::new(rect.w as usize, rect.h as usize);
        for ly in 0..rect.h {
            let y = rect.y as i64 + ly as i64;
            if y < 0 || y >= self.height as i64 {
                continue;
            }
            for lx in 0..rect.w {
                let x = rect.x as i64 + lx as i64;
                if x < 0 || x >= self.width as i64 {
                    continue;
                }
                let [r, g, b] = self.pixel(x as u32, y as u32);
                out.set(lx as usize, ly as usize, luma(r, g, b));
            }
        }
        out
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x}, {y}) outside {}x{} frame",
            self.width,
            self.height
        );
        (y as usize * self.width as usize + x as usize) * 3
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts", &self.pts)
            .finish_non_exhaustive()
    }
}

/// ITU-R BT.601 luma, the weighting camera pipelines use for grayscale.
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    clamp_to_u8(0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

// ----------------------------------------------------------------------------
// GrayImage: single-channel raster
// ----------------------------------------------------------------------------

/// Owned single-channel `u8` image in row-major layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        if data.len() != width * height {
            return Err(anyhow!(
                "gray image length mismatch: expected {}, got {}",
                width * height,
                data.len()
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.width + x] = value;
    }

    #[inline]
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.width;
        &self.data[start..start + self.width]
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Copy with every pixel outside `mask` set to zero. `mask` is row-major and must
    /// match the image size.
    pub fn masked(&self, mask: &[bool]) -> Result<GrayImage> {
        if mask.len() != self.data.len() {
            return Err(anyhow!(
                "mask length {} does not match {}x{} image",
                mask.len(),
                self.width,
                self.height
            ));
        }
        let data = self
            .data
            .iter()
            .zip(mask)
            .map(|(&v, &inside)| if inside { v } else { 0 })
            .collect();
        Ok(GrayImage {
            width: self.width,
            height: self.height,
            data,
        })
    }
}
