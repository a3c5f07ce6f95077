use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{BackgroundSettings, OccupancyThresholds, StrategyKind};
use crate::ingest::SourceSettings;
use crate::session::{RetryPolicy, SessionOptions};
use crate::DetectorSettings;

const DEFAULT_GEOMETRY_PATH: &str = "coordinates.yml";
const DEFAULT_SOURCE_URL: &str = "stub://lot";
const DEFAULT_TARGET_FPS: f64 = 30.0;
const DEFAULT_SNAPSHOT_LOG_SECS: u64 = 10;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OccupancydConfigFile {
    geometry_path: Option<PathBuf>,
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    retry: Option<RetryConfigFile>,
    detection_interval: Option<u32>,
    snapshot_log_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<f64>,
    start_frame: Option<u64>,
    loop_playback: Option<bool>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    strategy: Option<StrategyKind>,
    detect_delay_secs: Option<f64>,
    thresholds: Option<OccupancyThresholds>,
    background: Option<BackgroundSettings>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RetryConfigFile {
    max_retries: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct OccupancydConfig {
    pub geometry_path: PathBuf,
    pub source: SourceSettings,
    pub detector: DetectorSettings,
    pub retry: RetryPolicy,
    /// Run detection on every Nth frame read.
    pub detection_interval: u32,
    /// Interval between periodic snapshot log lines; zero disables them.
    pub snapshot_log_interval: Duration,
}

impl OccupancydConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OCCUPANCY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: OccupancydConfigFile) -> Self {
        let geometry_path = file
            .geometry_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_GEOMETRY_PATH));

        let source_file = file.source.unwrap_or_default();
        let source_defaults = SourceSettings::default();
        let source = SourceSettings {
            url: source_file
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            start_frame: source_file.start_frame.unwrap_or(0),
            loop_playback: source_file.loop_playback.unwrap_or(false),
            width: source_file.width.unwrap_or(source_defaults.width),
            height: source_file.height.unwrap_or(source_defaults.height),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector_defaults = DetectorSettings::default();
        let detector = DetectorSettings {
            strategy: detector_file.strategy.unwrap_or(detector_defaults.strategy),
            detect_delay_secs: detector_file
                .detect_delay_secs
                .unwrap_or(detector_defaults.detect_delay_secs),
            thresholds: detector_file
                .thresholds
                .unwrap_or(detector_defaults.thresholds),
            background: detector_file
                .background
                .unwrap_or(detector_defaults.background),
        };

        let retry_file = file.retry.unwrap_or_default();
        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: retry_file.max_retries.unwrap_or(retry_defaults.max_retries),
            initial_backoff_ms: retry_file
                .initial_backoff_ms
                .unwrap_or(retry_defaults.initial_backoff_ms),
            max_backoff_ms: retry_file
                .max_backoff_ms
                .unwrap_or(retry_defaults.max_backoff_ms),
        };

        Self {
            geometry_path,
            source,
            detector,
            retry,
            detection_interval: file.detection_interval.unwrap_or(1),
            snapshot_log_interval: Duration::from_secs(
                file.snapshot_log_secs.unwrap_or(DEFAULT_SNAPSHOT_LOG_SECS),
            ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("OCCUPANCY_GEOMETRY_PATH") {
            if !path.trim().is_empty() {
                self.geometry_path = PathBuf::from(path);
            }
        }
        if let Ok(url) = std::env::var("OCCUPANCY_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(fps) = std::env::var("OCCUPANCY_TARGET_FPS") {
            self.source.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("OCCUPANCY_TARGET_FPS must be a number"))?;
        }
        if let Ok(frame) = std::env::var("OCCUPANCY_START_FRAME") {
            self.source.start_frame = frame
                .trim()
                .parse()
                .map_err(|_| anyhow!("OCCUPANCY_START_FRAME must be a frame index"))?;
        }
        if let Ok(strategy) = std::env::var("OCCUPANCY_STRATEGY") {
            if !strategy.trim().is_empty() {
                self.detector.strategy = strategy.parse()?;
            }
        }
        if let Ok(delay) = std::env::var("OCCUPANCY_DETECT_DELAY_SECS") {
            self.detector.detect_delay_secs = delay
                .trim()
                .parse()
                .map_err(|_| anyhow!("OCCUPANCY_DETECT_DELAY_SECS must be a number of seconds"))?;
        }
        if let Ok(retries) = std::env::var("OCCUPANCY_MAX_RETRIES") {
            self.retry.max_retries = retries
                .trim()
                .parse()
                .map_err(|_| anyhow!("OCCUPANCY_MAX_RETRIES must be an integer"))?;
        }
        if let Ok(interval) = std::env::var("OCCUPANCY_DETECTION_INTERVAL") {
            self.detection_interval = interval
                .trim()
                .parse()
                .map_err(|_| anyhow!("OCCUPANCY_DETECTION_INTERVAL must be a frame count"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.geometry_path.as_os_str().is_empty() {
            return Err(anyhow!("geometry_path must not be empty"));
        }
        if self.detection_interval == 0 {
            return Err(anyhow!("detection_interval must be at least 1"));
        }
        self.source.validate()?;
        self.detector.validate()?;
        self.retry.validate()?;
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            target_fps: Some(self.source.target_fps),
            start_frame: self.source.start_frame,
            detection_interval: self.detection_interval,
            retry: self.retry.clone(),
        }
    }
}

fn read_config_file(path: &Path) -> Result<OccupancydConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
