//! Live RTSP frame source over GStreamer.
//!
//! Each connection owns one `rtspsrc ! decodebin ! videoconvert ! appsink` pipeline that
//! emits packed RGB. Frames carry the buffer PTS; buffers without one are stamped with
//! the time since the connection started playing, so `pts` never depends on wall-clock
//! dates.

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use std::time::{Duration, Instant};

use super::{FrameSource, SourceSettings, SourceStats};
use crate::frame::Frame;

/// A playing pipeline. Dropping it stops the pipeline.
struct GstStream {
    pipeline: gstreamer::Pipeline,
    sink: gstreamer_app::AppSink,
    playing_since: Instant,
}

struct DecodedSample {
    rgb: Vec<u8>,
    width: u32,
    height: u32,
    pts: Option<f64>,
}

impl GstStream {
    fn open(url: &str) -> Result<Self> {
        let description = format!(
            "rtspsrc location={url} latency=0 protocols=tcp ! decodebin ! videoconvert ! \
             video/x-raw,format=RGB ! appsink name=lot_sink sync=false max-buffers=1 drop=true"
        );
        let pipeline = gstreamer::parse::launch(&description)
            .with_context(|| format!("parse RTSP pipeline for {url}"))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP launch line did not yield a pipeline"))?;
        let sink = pipeline
            .by_name("lot_sink")
            .ok_or_else(|| anyhow!("RTSP pipeline has no lot_sink element"))?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("lot_sink is not an appsink"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .with_context(|| format!("start RTSP pipeline for {url}"))?;
        Ok(Self {
            pipeline,
            sink,
            playing_since: Instant::now(),
        })
    }

    /// First fatal bus message since the last call, if any.
    fn bus_failure(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        let mut failure = None;
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            let text = match message.view() {
                gstreamer::MessageView::Error(err) => format!(
                    "{} (from {})",
                    err.error(),
                    err.src()
                        .map(|s| s.path_string().to_string())
                        .unwrap_or_else(|| "pipeline".to_string())
                ),
                gstreamer::MessageView::Eos(..) => "RTSP server ended the stream".to_string(),
                _ => continue,
            };
            failure.get_or_insert(text);
        }
        failure
    }

    fn pull(&self, timeout: Duration) -> Result<Option<DecodedSample>> {
        let wait = gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64);
        match self.sink.try_pull_sample(wait) {
            Some(sample) => decode_sample(&sample).map(Some),
            None => Ok(None),
        }
    }
}

impl Drop for GstStream {
    fn drop(&mut self) {
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("RtspSource: pipeline did not stop cleanly: {}", err);
        }
    }
}

pub struct RtspSource {
    settings: SourceSettings,
    stream: Option<GstStream>,
    stats: SourceStats,
    last_frame_at: Option<Instant>,
}

impl RtspSource {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;
        let stats = SourceStats {
            url: settings.url.clone(),
            ..SourceStats::default()
        };
        Ok(Self {
            settings,
            stream: None,
            stats,
            last_frame_at: None,
        })
    }

    /// How long a read may block before the stream counts as stalled: four frame
    /// intervals, never under half a second.
    fn stall_timeout(&self) -> Duration {
        Duration::from_secs_f64((4.0 / self.settings.target_fps).max(0.5))
    }

    fn fail(&mut self, message: String) -> anyhow::Error {
        self.stats.read_failures += 1;
        anyhow!(message)
    }
}

impl FrameSource for RtspSource {
    fn connect(&mut self) -> Result<()> {
        self.stream = None;
        self.stream = Some(GstStream::open(&self.settings.url)?);
        self.last_frame_at = None;
        log::info!("RtspSource: playing {}", self.settings.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let timeout = self.stall_timeout();
        let Some(stream) = self.stream.as_ref() else {
            return Err(anyhow!("RTSP source {} is not connected", self.settings.url));
        };
        let started = stream.playing_since;
        let pulled = match stream.bus_failure() {
            Some(failure) => Err(failure),
            None => match stream.pull(timeout) {
                Ok(Some(sample)) => Ok(sample),
                Ok(None) => Err(format!("no frame within {:?}", timeout)),
                Err(err) => Err(format!("{:#}", err)),
            },
        };
        let sample = pulled.map_err(|message| self.fail(message))?;

        let pts = sample
            .pts
            .unwrap_or_else(|| started.elapsed().as_secs_f64());
        self.stats.frames_captured += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::from_rgb(sample.rgb, sample.width, sample.height, pts).map(Some)
    }

    fn seek(&mut self, index: u64) -> Result<()> {
        match index {
            0 => Ok(()),
            _ => Err(anyhow!("live RTSP stream cannot seek to frame {}", index)),
        }
    }

    fn reconnect(&mut self) -> Result<()> {
        self.stats.reconnects += 1;
        self.release();
        self.connect()
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            log::debug!("RtspSource: released {}", self.settings.url);
        }
    }

    fn is_healthy(&self) -> bool {
        let Some(stream) = &self.stream else {
            return false;
        };
        let grace = self.stall_timeout() * 2;
        match self.last_frame_at {
            Some(at) => at.elapsed() <= grace,
            None => stream.playing_since.elapsed() <= grace.max(Duration::from_secs(5)),
        }
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

/// Copy a sample into tightly packed RGB rows, dropping any stride padding.
fn decode_sample(sample: &gstreamer::Sample) -> Result<DecodedSample> {
    let caps = sample.caps().context("sample has no caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps).context("sample caps are not video")?;
    let buffer = sample.buffer().context("sample has no buffer")?;
    let map = buffer.map_readable().context("map sample buffer")?;

    let (width, height) = (info.width(), info.height());
    if width == 0 || height == 0 {
        return Err(anyhow!("sample has empty {}x{} caps", width, height));
    }
    let packed = width as usize * 3;
    let stride = (info.stride()[0] as usize).max(packed);
    let bytes = map.as_slice();
    if bytes.len() < stride * (height as usize - 1) + packed {
        return Err(anyhow!(
            "buffer of {} bytes is too short for {}x{} RGB",
            bytes.len(),
            width,
            height
        ));
    }

    let mut rgb = Vec::with_capacity(packed * height as usize);
    for row in bytes.chunks(stride).take(height as usize) {
        rgb.extend_from_slice(&row[..packed]);
    }
    Ok(DecodedSample {
        rgb,
        width,
        height,
        pts: buffer.pts().map(|t| t.nseconds() as f64 / 1e9),
    })
}
