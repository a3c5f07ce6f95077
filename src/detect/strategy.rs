use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::background::BackgroundSettings;
use crate::detect::mask::RegionMask;
use crate::detect::result::SpaceScore;
use crate::frame::GrayImage;

/// Scoring strategies available for raw classification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Background subtraction plus the motorcycle shape heuristic.
    #[default]
    MotionShape,
    /// Masked Laplacian texture energy against a fixed threshold.
    Texture,
    /// The motion-shape rule on OpenCV's MOG2 subtractor and Canny edges.
    #[cfg(feature = "backend-opencv")]
    OpencvMotion,
}

impl StrategyKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::MotionShape => "motion_shape",
            Self::Texture => "texture",
            #[cfg(feature = "backend-opencv")]
            Self::OpencvMotion => "opencv_motion",
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "motion_shape" | "motion-shape" | "motion" => Ok(Self::MotionShape),
            "texture" | "laplacian" => Ok(Self::Texture),
            #[cfg(feature = "backend-opencv")]
            "opencv_motion" | "opencv" | "mog2" => Ok(Self::OpencvMotion),
            #[cfg(not(feature = "backend-opencv"))]
            "opencv_motion" | "opencv" | "mog2" => Err(anyhow!(
                "strategy '{}' requires the backend-opencv feature",
                s.trim()
            )),
            other => Err(anyhow!("unknown occupancy strategy '{}'", other)),
        }
    }
}

/// Tunable decision thresholds. The defaults were tuned empirically for one overhead
/// camera; other placements will likely need their own values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OccupancyThresholds {
    /// Occupation ratio at or below which a space is free without further checks.
    pub motion_ratio: f64,
    /// Occupation ratio the shape heuristic additionally requires.
    pub confirm_ratio: f64,
    /// Minimum edge density.
    pub edge_density: f64,
    /// Sobel magnitude above which a pixel counts as an edge.
    pub edge_magnitude: f32,
    /// Expected width/height ratio of a parked motorcycle.
    pub target_aspect: f64,
    /// Allowed absolute deviation from `target_aspect` (exclusive).
    pub aspect_tolerance: f64,
    /// Texture energy at or above which the texture strategy reports occupied.
    pub texture_energy: f64,
    /// Gaussian sigma applied before the Laplacian.
    pub blur_sigma: f32,
}

impl Default for OccupancyThresholds {
    fn default() -> Self {
        Self {
            motion_ratio: 0.15,
            confirm_ratio: 0.20,
            edge_density: 0.10,
            edge_magnitude: 150.0,
            target_aspect: 0.6,
            aspect_tolerance: 0.2,
            texture_energy: 1.4,
            blur_sigma: 3.0,
        }
    }
}

impl OccupancyThresholds {
    pub fn validate(&self) -> Result<()> {
        let ratios = [
            ("motion_ratio", self.motion_ratio),
            ("confirm_ratio", self.confirm_ratio),
            ("edge_density", self.edge_density),
        ];
        for (name, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within 0..=1, got {}", name, value));
            }
        }
        if self.target_aspect <= 0.0 || self.aspect_tolerance <= 0.0 {
            return Err(anyhow!("aspect target and tolerance must be positive"));
        }
        if self.edge_magnitude < 0.0 || self.texture_energy < 0.0 || self.blur_sigma <= 0.0 {
            return Err(anyhow!(
                "edge magnitude, texture energy and blur sigma must be non-negative"
            ));
        }
        Ok(())
    }

    pub(crate) fn aspect_matches(&self, aspect: f64) -> bool {
        (aspect - self.target_aspect).abs() < self.aspect_tolerance
    }
}

/// Per-space raw occupancy scorer.
///
/// One instance serves exactly one space for the lifetime of a detector and may keep
/// state between frames (the motion strategy owns that space's background model).
/// Implementations must treat `roi` as read-only and must not retain it past the call.
pub trait OccupancyStrategy: Send {
    /// Strategy identifier, for logs.
    fn name(&self) -> &'static str;

    /// Score one space.
    ///
    /// `roi` is the unmasked intensity crop of the space's bounding rectangle; `mask`
    /// tells which of its pixels belong to the polygon.
    fn classify(&mut self, roi: &GrayImage, mask: &RegionMask) -> Result<SpaceScore>;

    /// Drop learnt state.
    fn reset(&mut self) {}
}

/// Build a fresh strategy instance for one space.
pub fn build_strategy(
    kind: StrategyKind,
    thresholds: &OccupancyThresholds,
    background: &BackgroundSettings,
) -> Box<dyn OccupancyStrategy> {
    match kind {
        StrategyKind::MotionShape => Box::new(super::backends::MotionShapeStrategy::new(
            thresholds.clone(),
            background.clone(),
        )),
        StrategyKind::Texture => {
            Box::new(super::backends::TextureStrategy::new(thresholds.clone()))
        }
        #[cfg(feature = "backend-opencv")]
        StrategyKind::OpencvMotion => Box::new(super::backends::OpencvMotionStrategy::new(
            thresholds.clone(),
            background.clone(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strategy_names() {
        assert_eq!("motion_shape".parse::<StrategyKind>().unwrap(), StrategyKind::MotionShape);
        assert_eq!("Texture".parse::<StrategyKind>().unwrap(), StrategyKind::Texture);
        assert!("yolo".parse::<StrategyKind>().is_err());
    }

    #[cfg(not(feature = "backend-opencv"))]
    #[test]
    fn opencv_strategy_needs_its_feature() {
        let err = "mog2".parse::<StrategyKind>().unwrap_err();
        assert!(err.to_string().contains("backend-opencv"));
    }

    #[cfg(feature = "backend-opencv")]
    #[test]
    fn opencv_strategy_builds_when_enabled() {
        let kind: StrategyKind = "opencv".parse().unwrap();
        assert_eq!(kind, StrategyKind::OpencvMotion);
        let strategy = build_strategy(
            kind,
            &OccupancyThresholds::default(),
            &BackgroundSettings::default(),
        );
        assert_eq!(strategy.name(), "opencv_motion");
    }

    #[test]
    fn default_thresholds_validate() {
        assert!(OccupancyThresholds::default().validate().is_ok());
        let bad = OccupancyThresholds {
            motion_ratio: 1.5,
            ..OccupancyThresholds::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn aspect_tolerance_is_exclusive() {
        let t = OccupancyThresholds::default();
        assert!(t.aspect_matches(0.6));
        assert!(t.aspect_matches(0.79));
        assert!(!t.aspect_matches(1.0));
    }
}
