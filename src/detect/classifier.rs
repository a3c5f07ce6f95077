use anyhow::{anyhow, Result};

use crate::detect::background::BackgroundSettings;
use crate::detect::mask::{RegionMask, RegionMaskCache};
use crate::detect::result::SpaceScore;
use crate::detect::strategy::{build_strategy, OccupancyStrategy, OccupancyThresholds, StrategyKind};
use crate::frame::GrayImage;

/// Raw per-space classification.
///
/// Holds one strategy instance per space, index-aligned with the mask cache. Degenerate
/// spaces get no strategy and are never classified.
pub struct OccupancyClassifier {
    kind: StrategyKind,
    thresholds: OccupancyThresholds,
    background: BackgroundSettings,
    strategies: Vec<Option<Box<dyn OccupancyStrategy>>>,
}

impl OccupancyClassifier {
    pub fn new(
        kind: StrategyKind,
        thresholds: OccupancyThresholds,
        background: BackgroundSettings,
        masks: &RegionMaskCache,
    ) -> Self {
        let mut classifier = Self {
            kind,
            thresholds,
            background,
            strategies: Vec::new(),
        };
        classifier.rebuild(masks);
        classifier
    }

    /// Replace every strategy instance to match `masks`, dropping learnt state.
    pub fn rebuild(&mut self, masks: &RegionMaskCache) {
        self.strategies = masks
            .masks()
            .iter()
            .map(|mask| {
                (!mask.degenerate)
                    .then(|| build_strategy(self.kind, &self.thresholds, &self.background))
            })
            .collect();
        log::debug!(
            "classifier ready: strategy={} spaces={}",
            self.kind.name(),
            self.strategies.len()
        );
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Classify space `index`. Returns `None` for a degenerate space.
    pub fn classify_space(
        &mut self,
        index: usize,
        roi: &GrayImage,
        mask: &RegionMask,
    ) -> Result<Option<SpaceScore>> {
        let slot = self
            .strategies
            .get_mut(index)
            .ok_or_else(|| anyhow!("no strategy for space index {}", index))?;
        match slot {
            Some(strategy) => strategy.classify(roi, mask).map(Some),
            None => Ok(None),
        }
    }

    pub fn reset_space(&mut self, index: usize) {
        if let Some(Some(strategy)) = self.strategies.get_mut(index) {
            strategy.reset();
        }
    }

    pub fn reset_all(&mut self) {
        for strategy in self.strategies.iter_mut().flatten() {
            strategy.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{DocumentFormat, GeometryStore};

    const DOC: &str = r#"{
        "frame_dimensions": {"width": 64, "height": 64},
        "spots": [
            {"id": 1, "coordinates": [[0,0],[20,0],[20,30],[0,30]]},
            {"id": 2, "coordinates": [[30,5],[30,5],[30,5],[30,5]]}
        ]
    }"#;

    #[test]
    fn degenerate_space_has_no_strategy() {
        let store = GeometryStore::parse(DOC, DocumentFormat::Json).unwrap();
        let masks = RegionMaskCache::from_geometry(&store);
        let mut classifier = OccupancyClassifier::new(
            StrategyKind::Texture,
            OccupancyThresholds::default(),
            BackgroundSettings::default(),
            &masks,
        );
        assert_eq!(classifier.len(), 2);

        let mask = masks.get(0).unwrap();
        let roi = GrayImage::new(mask.rect.w as usize, mask.rect.h as usize);
        assert!(classifier.classify_space(0, &roi, mask).unwrap().is_some());

        let degenerate = masks.get(1).unwrap();
        assert!(degenerate.degenerate);
        assert!(classifier
            .classify_space(1, &GrayImage::new(1, 1), degenerate)
            .unwrap()
            .is_none());
        assert!(classifier.classify_space(7, &roi, mask).is_err());
    }
}
