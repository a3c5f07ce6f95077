//! Adaptive per-pixel background model.
//!
//! Every pixel keeps a small mixture of Gaussian modes over intensity. Modes that carry
//! most of the weight describe the empty surface; a pixel that fits none of them is
//! foreground. The model learns from every frame it sees, so a parked vehicle is slowly
//! absorbed into the background over roughly `history` frames.
//!
//! One model belongs to exactly one space. Models are never shared, which keeps motion in
//! one space from leaking into another's baseline.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::frame::GrayImage;

/// Cumulative weight a pixel's leading modes need before they stop counting as background.
const BACKGROUND_RATIO: f32 = 0.9;
/// Looser match threshold (squared standard deviations) used to update an existing mode.
const VAR_THRESHOLD_GEN: f32 = 9.0;
const VAR_INIT: f32 = 15.0;
const VAR_MIN: f32 = 4.0;
const VAR_MAX: f32 = 75.0;
/// Complexity reduction prior: weights decay by `alpha * CT` each frame.
const COMPLEXITY_PRIOR: f32 = 0.05;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundSettings {
    /// Learning window in frames.
    pub history: u32,
    /// Squared-deviation threshold for background membership.
    pub var_threshold: f32,
    /// Maximum Gaussian modes per pixel.
    pub max_modes: usize,
    pub detect_shadows: bool,
    /// Lowest brightness ratio to a background mode still treated as shadow.
    pub shadow_tau: f32,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            history: 500,
            var_threshold: 16.0,
            max_modes: 3,
            detect_shadows: true,
            shadow_tau: 0.5,
        }
    }
}

impl BackgroundSettings {
    pub fn validate(&self) -> Result<()> {
        if self.history == 0 {
            return Err(anyhow!("background history must be at least one frame"));
        }
        if self.max_modes == 0 {
            return Err(anyhow!("background model needs at least one mode per pixel"));
        }
        if self.var_threshold <= 0.0 {
            return Err(anyhow!("background var_threshold must be positive"));
        }
        if !(0.0..=1.0).contains(&self.shadow_tau) {
            return Err(anyhow!("shadow_tau must be within 0..=1"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelClass {
    Background,
    Shadow,
    Foreground,
}

/// Per-pixel classification produced by one `BackgroundModel::apply` call.
#[derive(Clone, Debug)]
pub struct ForegroundMask {
    pub width: usize,
    pub height: usize,
    pub classes: Vec<PixelClass>,
}

impl ForegroundMask {
    fn all_background(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            classes: vec![PixelClass::Background; width * height],
        }
    }

    #[inline]
    pub fn is_foreground(&self, x: usize, y: usize) -> bool {
        self.classes[y * self.width + x] == PixelClass::Foreground
    }

    /// Foreground pixels. Shadows are not counted.
    pub fn foreground_count(&self) -> usize {
        self.classes
            .iter()
            .filter(|&&c| c == PixelClass::Foreground)
            .count()
    }

    pub fn shadow_count(&self) -> usize {
        self.classes
            .iter()
            .filter(|&&c| c == PixelClass::Shadow)
            .count()
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Mode {
    weight: f32,
    mean: f32,
    variance: f32,
}

/// Gaussian-mixture background estimator for one space's ROI.
#[derive(Clone, Debug)]
pub struct BackgroundModel {
    settings: BackgroundSettings,
    width: usize,
    height: usize,
    /// `width * height * max_modes` slots, strongest mode first per pixel.
    modes: Vec<Mode>,
    used: Vec<u8>,
    frames_seen: u64,
}

impl BackgroundModel {
    pub fn new(settings: BackgroundSettings) -> Self {
        let settings = BackgroundSettings {
            history: settings.history.max(1),
            max_modes: settings.max_modes.clamp(1, u8::MAX as usize),
            ..settings
        };
        Self {
            settings,
            width: 0,
            height: 0,
            modes: Vec::new(),
            used: Vec::new(),
            frames_seen: 0,
        }
    }

    pub fn settings(&self) -> &BackgroundSettings {
        &self.settings
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Forget everything learnt. The next frame seeds a fresh baseline.
    pub fn reset(&mut self) {
        self.width = 0;
        self.height = 0;
        self.modes.clear();
        self.used.clear();
        self.frames_seen = 0;
    }

    /// Learning rate for the frame about to be processed.
    pub fn learning_rate(&self) -> f32 {
        let n = (self.frames_seen + 1).saturating_mul(2);
        1.0 / n.min(self.settings.history as u64) as f32
    }

    /// Mean of the strongest mode at (x, y), if the model has been seeded.
    pub fn background_at(&self, x: usize, y: usize) -> Option<f32> {
        if self.frames_seen == 0 || x >= self.width || y >= self.height {
            return None;
        }
        Some(self.modes[(y * self.width + x) * self.settings.max_modes].mean)
    }

    /// Classify `image` against the model, then learn from it.
    ///
    /// The first frame (or the first after a size change) only seeds the model and is
    /// reported as entirely background.
    pub fn apply(&mut self, image: &GrayImage) -> ForegroundMask {
        if self.frames_seen == 0 || image.width != self.width || image.height != self.height {
            if self.frames_seen > 0 {
                log::debug!(
                    "background model resized {}x{} -> {}x{}; reseeding",
                    self.width,
                    self.height,
                    image.width,
                    image.height
                );
            }
            self.seed(image);
            return ForegroundMask::all_background(image.width, image.height);
        }

        let alpha = self.learning_rate();
        let k = self.settings.max_modes;
        let mut classes = Vec::with_capacity(image.data.len());
        for (i, &value) in image.data.iter().enumerate() {
            let slots = &mut self.modes[i * k..(i + 1) * k];
            let used = &mut self.used[i];
            let class = update_pixel(&self.settings, slots, used, value as f32, alpha);
            classes.push(class);
        }
        self.frames_seen += 1;

        ForegroundMask {
            width: image.width,
            height: image.height,
            classes,
        }
    }

    fn seed(&mut self, image: &GrayImage) {
        let k = self.settings.max_modes;
        self.width = image.width;
        self.height = image.height;
        self.modes = vec![Mode::default(); image.data.len() * k];
        self.used = vec![1; image.data.len()];
        for (i, &value) in image.data.iter().enumerate() {
            self.modes[i * k] = Mode {
                weight: 1.0,
                mean: value as f32,
                variance: VAR_INIT,
            };
        }
        self.frames_seen = 1;
    }
}

fn update_pixel(
    settings: &BackgroundSettings,
    modes: &mut [Mode],
    used: &mut u8,
    value: f32,
    alpha: f32,
) -> PixelClass {
    let prune = alpha * COMPLEXITY_PRIOR;
    let mut background = false;
    let mut fitted = false;
    let mut total = 0.0f32;
    let mut n = *used as usize;

    let mut m = 0;
    while m < n {
        let mut mode = modes[m];
        let mut weight = (1.0 - alpha) * mode.weight - prune;
        if !fitted {
            let diff = value - mode.mean;
            let dist2 = diff * diff;
            if total < BACKGROUND_RATIO && dist2 < settings.var_threshold * mode.variance {
                background = true;
            }
            if dist2 < VAR_THRESHOLD_GEN * mode.variance {
                fitted = true;
                weight += alpha;
                let rate = alpha / weight;
                mode.mean += rate * diff;
                mode.variance = (mode.variance + rate * (dist2 - mode.variance)).clamp(VAR_MIN, VAR_MAX);
            }
        }
        if weight < prune {
            // Mode faded out: drop it and shift the weaker ones up.
            modes.copy_within(m + 1..n, m);
            n -= 1;
            continue;
        }
        mode.weight = weight;
        modes[m] = mode;
        total += weight;
        m += 1;
    }

    if !fitted {
        let slot = if n < modes.len() {
            n += 1;
            n - 1
        } else {
            total -= modes[n - 1].weight;
            n - 1
        };
        let weight = if n == 1 { 1.0 } else { alpha };
        modes[slot] = Mode {
            weight,
            mean: value,
            variance: VAR_INIT,
        };
        total += weight;
    }

    if total > 0.0 {
        for mode in modes[..n].iter_mut() {
            mode.weight /= total;
        }
    }
    modes[..n].sort_by(|a, b| b.weight.total_cmp(&a.weight));
    *used = n as u8;

    if background {
        PixelClass::Background
    } else if settings.detect_shadows && is_shadow(settings, &modes[..n], value) {
        PixelClass::Shadow
    } else {
        PixelClass::Foreground
    }
}

/// A pixel darker than a background mode, but not by more than `shadow_tau`, is a shadow
/// cast on that surface rather than an object.
fn is_shadow(settings: &BackgroundSettings, modes: &[Mode], value: f32) -> bool {
    let mut cumulative = 0.0f32;
    for mode in modes {
        if mode.mean > 0.0 {
            let ratio = value / mode.mean;
            if (settings.shadow_tau..=1.0).contains(&ratio) {
                let residual = value - ratio * mode.mean;
                if residual * residual < settings.var_threshold * mode.variance * ratio * ratio {
                    return true;
                }
            }
        }
        cumulative += mode.weight;
        if cumulative > BACKGROUND_RATIO {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(width: usize, height: usize, value: u8) -> GrayImage {
        GrayImage::from_vec(width, height, vec![value; width * height]).unwrap()
    }

    #[test]
    fn first_frame_seeds_and_reports_background() {
        let mut model = BackgroundModel::new(BackgroundSettings::default());
        let mask = model.apply(&uniform(8, 8, 120));
        assert_eq!(mask.foreground_count(), 0);
        assert_eq!(model.frames_seen(), 1);
        assert_eq!(model.background_at(3, 3), Some(120.0));
    }

    #[test]
    fn static_scene_stays_background() {
        let mut model = BackgroundModel::new(BackgroundSettings::default());
        for _ in 0..50 {
            let mask = model.apply(&uniform(6, 6, 90));
            assert_eq!(mask.foreground_count(), 0);
        }
    }

    #[test]
    fn bright_object_is_foreground() {
        let mut model = BackgroundModel::new(BackgroundSettings::default());
        for _ in 0..300 {
            model.apply(&uniform(10, 10, 120));
        }
        let mut scene = uniform(10, 10, 120);
        for y in 2..6 {
            for x in 2..5 {
                scene.set(x, y, 250);
            }
        }
        let mask = model.apply(&scene);
        assert_eq!(mask.foreground_count(), 12);
        assert!(mask.is_foreground(2, 2));
        assert!(!mask.is_foreground(0, 0));
    }

    #[test]
    fn moderate_darkening_is_shadow_not_foreground() {
        let mut model = BackgroundModel::new(BackgroundSettings::default());
        for _ in 0..300 {
            model.apply(&uniform(4, 4, 160));
        }
        let mask = model.apply(&uniform(4, 4, 100));
        assert_eq!(mask.foreground_count(), 0);
        assert_eq!(mask.shadow_count(), 16);

        let mut no_shadows = BackgroundModel::new(BackgroundSettings {
            detect_shadows: false,
            ..BackgroundSettings::default()
        });
        for _ in 0..300 {
            no_shadows.apply(&uniform(4, 4, 160));
        }
        assert_eq!(no_shadows.apply(&uniform(4, 4, 100)).foreground_count(), 16);
    }

    #[test]
    fn persistent_object_is_absorbed_over_the_learning_window() {
        let settings = BackgroundSettings {
            history: 50,
            ..BackgroundSettings::default()
        };
        let mut model = BackgroundModel::new(settings);
        for _ in 0..60 {
            model.apply(&uniform(3, 3, 100));
        }
        let parked = uniform(3, 3, 220);
        assert_eq!(model.apply(&parked).foreground_count(), 9);
        let mut absorbed_after = None;
        for frame in 1..200 {
            if model.apply(&parked).foreground_count() == 0 {
                absorbed_after = Some(frame);
                break;
            }
        }
        let frames = absorbed_after.expect("object absorbed");
        assert!(frames > 2 && frames < 50, "absorbed after {frames} frames");
    }

    #[test]
    fn reset_forgets_the_baseline() {
        let mut model = BackgroundModel::new(BackgroundSettings::default());
        for _ in 0..10 {
            model.apply(&uniform(4, 4, 30));
        }
        model.reset();
        assert_eq!(model.frames_seen(), 0);
        assert_eq!(model.background_at(0, 0), None);
        assert_eq!(model.apply(&uniform(4, 4, 200)).foreground_count(), 0);
    }
}
