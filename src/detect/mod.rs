//! Per-space occupancy detection: masks, raw classification and debouncing.

pub mod background;
mod backends;
mod classifier;
pub mod components;
mod debounce;
pub mod filters;
mod mask;
mod result;
mod strategy;

pub use backends::{MotionShapeStrategy, TextureStrategy};
#[cfg(feature = "backend-opencv")]
pub use backends::OpencvMotionStrategy;
pub use background::{BackgroundModel, BackgroundSettings, ForegroundMask, PixelClass};
pub use classifier::OccupancyClassifier;
pub use debounce::{SpaceRuntimeState, TemporalDebouncer, Transition};
pub use mask::{RegionMask, RegionMaskCache};
pub use result::SpaceScore;
pub use strategy::{build_strategy, OccupancyStrategy, OccupancyThresholds, StrategyKind};
