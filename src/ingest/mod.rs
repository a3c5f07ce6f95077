//! Frame ingestion sources.
//!
//! This module provides different sources of decoded frames:
//! - Synthetic lot (`stub://` URLs)
//! - Scripted frames and failures (tests, replays)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - RTSP streams (feature: rtsp-gstreamer)
//!
//! Every source yields owned RGB [`Frame`]s stamped with a stream presentation
//! timestamp. Sources never interpret pixels; decoding quirks stay behind this trait.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

#[cfg(feature = "ingest-file-ffmpeg")]
pub mod file;
#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;
pub mod scripted;
pub mod synthetic;

#[cfg(feature = "ingest-file-ffmpeg")]
pub use file::FileSource;
#[cfg(feature = "rtsp-gstreamer")]
pub use rtsp::RtspSource;
pub use scripted::{ScriptCounters, ScriptStep, ScriptedSource};
pub use synthetic::SyntheticSource;

/// A stream of decoded frames.
///
/// `next_frame` distinguishes a recoverable read failure (`Err`) from the end of a finite
/// stream (`Ok(None)`). The session worker retries the former and stops on the latter.
pub trait FrameSource: Send {
    /// Open the underlying stream.
    fn connect(&mut self) -> Result<()>;

    /// Read the next frame. `Ok(None)` means end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Position the stream at frame `index`. Live sources reject this.
    fn seek(&mut self, index: u64) -> Result<()>;

    /// Drop and reopen the stream after a failure.
    fn reconnect(&mut self) -> Result<()> {
        self.release();
        self.connect()
    }

    /// Release every handle held on the stream. Idempotent.
    fn release(&mut self);

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn seek(&mut self, index: u64) -> Result<()> {
        (**self).seek(index)
    }

    fn reconnect(&mut self) -> Result<()> {
        (**self).reconnect()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub read_failures: u64,
    pub reconnects: u64,
    pub url: String,
}

/// Where and how to read frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// `stub://...`, `rtsp://...`, or a local file path.
    pub url: String,
    /// Pacing rate of the session worker, and timestamp rate of synthetic frames.
    pub target_fps: f64,
    /// Frame to seek to after connecting (file sources only).
    pub start_frame: u64,
    /// Restart finite sources at `start_frame` instead of ending the stream.
    pub loop_playback: bool,
    /// Synthetic frame size.
    pub width: u32,
    pub height: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: "stub://lot".to_string(),
            target_fps: 30.0,
            start_frame: 0,
            loop_playback: false,
            width: 640,
            height: 480,
        }
    }
}

impl SourceSettings {
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if !self.target_fps.is_finite() || self.target_fps <= 0.0 {
            return Err(anyhow!("target_fps must be positive"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("synthetic frame size must be non-zero"));
        }
        Ok(())
    }
}

/// Source kind implied by a URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Synthetic,
    Rtsp,
    File,
}

impl SourceKind {
    pub fn from_url(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if url.starts_with("stub://") {
            Ok(Self::Synthetic)
        } else if url.starts_with("rtsp://") || url.starts_with("rtsps://") {
            Ok(Self::Rtsp)
        } else if url.starts_with("file://") || !url.contains("://") {
            Ok(Self::File)
        } else {
            Err(anyhow!("unsupported source url scheme: {}", url))
        }
    }
}

/// Build the source `settings.url` names. The source is not connected yet.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    settings.validate()?;
    match SourceKind::from_url(&settings.url)? {
        SourceKind::Synthetic => Ok(Box::new(SyntheticSource::new(settings.clone())?)),
        SourceKind::Rtsp => {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                Ok(Box::new(RtspSource::new(settings.clone())?))
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                Err(anyhow!("RTSP requires the rtsp-gstreamer feature"))
            }
        }
        SourceKind::File => {
            #[cfg(feature = "ingest-file-ffmpeg")]
            {
                Ok(Box::new(FileSource::new(settings.clone())?))
            }
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            {
                Err(anyhow!(
                    "file ingestion requires the ingest-file-ffmpeg feature"
                ))
            }
        }
    }
}
