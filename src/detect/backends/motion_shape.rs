use anyhow::{anyhow, Result};

use crate::detect::background::{BackgroundModel, BackgroundSettings};
use crate::detect::components::largest_component;
use crate::detect::filters::edge_density;
use crate::detect::mask::RegionMask;
use crate::detect::result::SpaceScore;
use crate::detect::strategy::{OccupancyStrategy, OccupancyThresholds};
use crate::frame::GrayImage;

/// Background subtraction followed by the motorcycle shape heuristic.
///
/// Owns the background model of exactly one space; the model learns from every ROI it
/// is given, whatever the verdict.
pub struct MotionShapeStrategy {
    thresholds: OccupancyThresholds,
    model: BackgroundModel,
}

impl MotionShapeStrategy {
    pub fn new(thresholds: OccupancyThresholds, background: BackgroundSettings) -> Self {
        Self {
            thresholds,
            model: BackgroundModel::new(background),
        }
    }

    pub fn model(&self) -> &BackgroundModel {
        &self.model
    }
}

impl OccupancyStrategy for MotionShapeStrategy {
    fn name(&self) -> &'static str {
        "motion_shape"
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

        let masked = roi.masked(&mask.bitmap)?;
        let foreground = self.model.apply(&masked);

        let t = &self.thresholds;
        let mut score = SpaceScore {
            occupation_ratio: ratio(foreground.foreground_count() as f64, mask.area),
            ..SpaceScore::default()
        };
        if score.occupation_ratio <= t.motion_ratio {
            return Ok(score);
        }

        score.edge_density = edge_density(&masked, t.edge_magnitude);
        score.roi_aspect = ratio(mask.rect.w as f64, mask.rect.h as f64);
        score.contour_aspect = largest_component(&foreground)
            .map(|c| c.aspect_ratio())
            .unwrap_or(0.0);

        score.occupied = score.edge_density > t.edge_density
            && t.aspect_matches(score.roi_aspect)
            && t.aspect_matches(score.contour_aspect)
            && score.occupation_ratio > t.confirm_ratio;

        log::trace!(
            "space {}: ratio={:.3} edges={:.3} roi_aspect={:.3} contour_aspect={:.3} -> {}",
            mask.space_id,
            score.occupation_ratio,
            score.edge_density,
            score.roi_aspect,
            score.contour_aspect,
            score.occupied
        );
        Ok(score)
    }

    fn reset(&mut self) {
        self.model.reset();
    }
}

/// Division with 0 substituted for a zero denominator.
pub(crate) fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, SpaceGeometry};

    fn space(w: i32, h: i32) -> RegionMask {
        RegionMask::build(&SpaceGeometry {
            id: 1,
            polygon: [
                Point { x: 0, y: 0 },
                Point { x: w, y: 0 },
                Point { x: w, y: h },
                Point { x: 0, y: h },
            ],
        })
    }

    fn flat(mask: &RegionMask, value: u8) -> GrayImage {
        GrayImage::from_vec(
            mask.rect.w as usize,
            mask.rect.h as usize,
            vec![value; mask.bitmap.len()],
        )
        .unwrap()
    }

    #[test]
    fn static_scene_is_free() {
        let mask = space(30, 50);
        let mut strategy = MotionShapeStrategy::new(
            OccupancyThresholds::default(),
            BackgroundSettings::default(),
        );
        for _ in 0..20 {
            let score = strategy.classify(&flat(&mask, 90), &mask).unwrap();
            assert!(!score.occupied);
            assert_eq!(score.occupation_ratio, 0.0);
        }
        assert_eq!(strategy.model().frames_seen(), 20);
    }

    #[test]
    fn square_blob_fails_shape_check() {
        let mask = space(30, 50);
        let mut strategy = MotionShapeStrategy::new(
            OccupancyThresholds::default(),
            BackgroundSettings::default(),
        );
        for _ in 0..30 {
            strategy.classify(&flat(&mask, 120), &mask).unwrap();
        }
        let mut roi = flat(&mask, 120);
        for y in 10..35 {
            for x in 3..28 {
                roi.set(x, y, if (y / 2) % 2 == 0 { 250 } else { 10 });
            }
        }
        let score = strategy.classify(&roi, &mask).unwrap();
        assert!(score.occupation_ratio > 0.2);
        assert!(score.edge_density > 0.1);
        assert!((score.contour_aspect - 1.0).abs() < 1e-9);
        assert!(!score.occupied);
    }

    #[test]
    fn mismatched_roi_is_an_error() {
        let mask = space(10, 10);
        let mut strategy = MotionShapeStrategy::new(
            OccupancyThresholds::default(),
            BackgroundSettings::default(),
        );
        let roi = GrayImage::new(4, 4);
        assert!(strategy.classify(&roi, &mask).is_err());
    }

    #[test]
    fn zero_denominator_ratio_is_neutral() {
        assert_eq!(ratio(5.0, 0.0), 0.0);
        assert_eq!(ratio(1.0, 4.0), 0.25);
    }
}
