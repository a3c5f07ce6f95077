use anyhow::{anyhow, Result};

use crate::detect::filters::{gaussian_blur, masked_laplacian_energy};
use crate::detect::mask::RegionMask;
use crate::detect::result::SpaceScore;
use crate::detect::strategy::{OccupancyStrategy, OccupancyThresholds};
use crate::frame::GrayImage;

/// 5×5 blur window.
const BLUR_RADIUS: usize = 2;

/// Stateless texture scorer: a parked vehicle adds high-frequency detail that bare
/// asphalt lacks.
pub struct TextureStrategy {
    thresholds: OccupancyThresholds,
}

impl TextureStrategy {
    pub fn new(thresholds: OccupancyThresholds) -> Self {
        Self { thresholds }
    }
}

impl OccupancyStrategy for TextureStrategy {
    fn name(&self) -> &'static str {
        "texture"
    }

    fn classify(&mut self, roi: &GrayImage, mask: &RegionMask) -> Result<SpaceScore> {
        if mask.degenerate || roi.is_empty() {
            return Ok(SpaceScore::free());
        }
        if mask.bitmap.len() != roi.width * roi.height {
            return Err(anyhow!(
                "space {}: roi {}x{} does not match mask {}x{}",
                mask.space_id,
                roi.width,
                roi.height,
                mask.rect.w,
                mask.rect.h
            ));
        }

        let blurred = gaussian_blur(roi, self.thresholds.blur_sigma, BLUR_RADIUS);
        let energy = masked_laplacian_energy(&blurred, roi.width, roi.height, &mask.bitmap);
        Ok(SpaceScore {
            occupied: energy >= self.thresholds.texture_energy,
            texture_energy: energy,
            ..SpaceScore::default()
        })
    }
}
