#![cfg(feature = "backend-opencv")]

//! Motion-shape scoring on OpenCV.
//!
//! Same decision rule as [`MotionShapeStrategy`](super::MotionShapeStrategy), with the
//! per-pixel work done by OpenCV: a MOG2 background subtractor, Canny edges and external
//! contours of the foreground mask.

use anyhow::{anyhow, Context, Result};
use opencv::core::{self, Mat, Point, Ptr, Vector};
use opencv::prelude::*;
use opencv::{imgproc, video};

use super::motion_shape::ratio;
use crate::detect::background::BackgroundSettings;
use crate::detect::mask::RegionMask;
use crate::detect::result::SpaceScore;
use crate::detect::strategy::{OccupancyStrategy, OccupancyThresholds};
use crate::frame::GrayImage;

const CANNY_LOW: f64 = 50.0;
const CANNY_HIGH: f64 = 150.0;
/// MOG2 writes shadows as 127 and foreground as 255; only the latter counts.
const FOREGROUND_CUTOFF: f64 = 200.0;

pub struct OpencvMotionStrategy {
    thresholds: OccupancyThresholds,
    background: BackgroundSettings,
    /// Created on the first frame so a reset is just dropping it.
    subtractor: Option<Ptr<video::BackgroundSubtractorMOG2>>,
}

impl OpencvMotionStrategy {
    pub fn new(thresholds: OccupancyThresholds, background: BackgroundSettings) -> Self {
        Self {
            thresholds,
            background,
            subtractor: None,
        }
    }

    fn subtractor(&mut self) -> Result<&mut Ptr<video::BackgroundSubtractorMOG2>> {
        if self.subtractor.is_none() {
            let history = i32::try_from(self.background.history)
                .context("background history does not fit OpenCV")?;
            let mog2 = video::create_background_subtractor_mog2(
                history,
                f64::from(self.background.var_threshold),
                self.background.detect_shadows,
            )
            .context("create MOG2 subtractor")?;
            self.subtractor = Some(mog2);
        }
        self.subtractor
            .as_mut()
            .ok_or_else(|| anyhow!("MOG2 subtractor unavailable"))
    }
}

impl OccupancyStrategy for OpencvMotionStrategy {
    fn name(&self) -> &'static str {
        "opencv_motion"
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
        let rows = i32::try_from(masked.height).context("roi too tall for OpenCV")?;
        let gray = Mat::from_slice(&masked.data)?.reshape(1, rows)?.try_clone()?;

        let mut raw = Mat::default();
        self.subtractor()?.apply(&gray, &mut raw, -1.0)?;
        let mut foreground = Mat::default();
        imgproc::threshold(
            &raw,
            &mut foreground,
            FOREGROUND_CUTOFF,
            255.0,
            imgproc::THRESH_BINARY,
        )?;

        let t = &self.thresholds;
        let mut score = SpaceScore {
            occupation_ratio: ratio(f64::from(core::count_non_zero(&foreground)?), mask.area),
            ..SpaceScore::default()
        };
        if score.occupation_ratio <= t.motion_ratio {
            return Ok(score);
        }

        let mut edges = Mat::default();
        imgproc::canny(&gray, &mut edges, CANNY_LOW, CANNY_HIGH, 3, false)?;
        score.edge_density = ratio(
            f64::from(core::count_non_zero(&edges)?),
            (masked.width * masked.height) as f64,
        );
        score.roi_aspect = ratio(mask.rect.w as f64, mask.rect.h as f64);

        let mut contours: Vector<Vector<Point>> = Vector::new();
        imgproc::find_contours(
            &foreground,
            &mut contours,
            imgproc::RETR_EXTERNAL,
            imgproc::CHAIN_APPROX_SIMPLE,
            Point::new(0, 0),
        )?;
        let mut largest: Option<(f64, core::Rect)> = None;
        for contour in contours.iter() {
            let area = imgproc::contour_area(&contour, false)?;
            if largest.map_or(true, |(best, _)| area > best) {
                largest = Some((area, imgproc::bounding_rect(&contour)?));
            }
        }
        score.contour_aspect = largest
            .map(|(_, rect)| ratio(f64::from(rect.width), f64::from(rect.height)))
            .unwrap_or(0.0);

        score.occupied = score.edge_density > t.edge_density
            && t.aspect_matches(score.roi_aspect)
            && t.aspect_matches(score.contour_aspect)
            && score.occupation_ratio > t.confirm_ratio;
        Ok(score)
    }

    fn reset(&mut self) {
        self.subtractor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point as GeoPoint, SpaceGeometry};

    fn space() -> RegionMask {
        RegionMask::build(&SpaceGeometry {
            id: 1,
            polygon: [
                GeoPoint { x: 0, y: 0 },
                GeoPoint { x: 30, y: 0 },
                GeoPoint { x: 30, y: 50 },
                GeoPoint { x: 0, y: 50 },
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
    fn static_scene_is_free_and_a_new_object_is_foreground() {
        let mask = space();
        let mut strategy = OpencvMotionStrategy::new(
            OccupancyThresholds::default(),
            BackgroundSettings::default(),
        );
        for _ in 0..30 {
            let score = strategy.classify(&flat(&mask, 120), &mask).unwrap();
            assert!(!score.occupied);
        }

        let mut roi = flat(&mask, 120);
        for y in 10..40 {
            for x in 8..26 {
                roi.set(x, y, if (y / 2) % 2 == 0 { 250 } else { 10 });
            }
        }
        let score = strategy.classify(&roi, &mask).unwrap();
        assert!(score.occupation_ratio > 0.15);
        assert!(score.edge_density > 0.0);

        strategy.reset();
        assert!(strategy.subtractor.is_none());
    }
}
