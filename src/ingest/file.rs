//! Recorded video file source over FFmpeg.
//!
//! Frames are decoded in-process and converted to RGB24. Timestamps come from the
//! container (`pts * time_base`), or `frame_index / fps` when a frame carries none. With
//! `loop_playback` the file restarts at `start_frame` on end of stream and timestamps
//! keep increasing across the restart.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::{FrameSource, SourceSettings, SourceStats};
use crate::frame::Frame;

/// An open container plus the decoder and RGB converter for its best video track.
struct VideoDecoder {
    input: ffmpeg::format::context::Input,
    track: usize,
    codec: ffmpeg::codec::decoder::Video,
    to_rgb: ffmpeg::software::scaling::Context,
    time_base: f64,
    fps: f64,
    flushed: bool,
    /// Decoded frames stamped before this are dropped (seeks land on keyframes).
    discard_before: Option<f64>,
    next_index: u64,
}

struct DecodedFrame {
    rgb: Vec<u8>,
    width: u32,
    height: u32,
    pts: f64,
}

impl VideoDecoder {
    fn open(path: &str, fallback_fps: f64) -> Result<Self> {
        let input = ffmpeg::format::input(path)
            .with_context(|| format!("open video file {path}"))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("{path} contains no video track"))?;
        let track = stream.index();
        let time_base = f64::from(stream.time_base());
        let rate = f64::from(stream.avg_frame_rate());
        let fps = if rate.is_finite() && rate > 0.0 {
            rate
        } else {
            fallback_fps
        };

        let codec = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("read codec parameters")?
            .decoder()
            .video()
            .context("open video decoder")?;
        let to_rgb = ffmpeg::software::scaling::Context::get(
            codec.format(),
            codec.width(),
            codec.height(),
            ffmpeg::format::Pixel::RGB24,
            codec.width(),
            codec.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .context("create RGB converter")?;

        Ok(Self {
            input,
            track,
            codec,
            to_rgb,
            time_base,
            fps,
            flushed: false,
            discard_before: None,
            next_index: 0,
        })
    }

    /// Next frame in presentation order, or `None` once the file is drained.
    fn next(&mut self) -> Result<Option<DecodedFrame>> {
        let mut raw = ffmpeg::frame::Video::empty();
        loop {
            if self.codec.receive_frame(&mut raw).is_ok() {
                let index = self.next_index;
                self.next_index += 1;
                let pts = match raw.timestamp() {
                    Some(ts) => ts as f64 * self.time_base,
                    None => index as f64 / self.fps,
                };
                if matches!(self.discard_before, Some(target) if pts + 1e-6 < target) {
                    continue;
                }
                self.discard_before = None;

                let mut rgb = ffmpeg::frame::Video::empty();
                self.to_rgb.run(&raw, &mut rgb).context("convert frame to RGB")?;
                return Ok(Some(DecodedFrame {
                    rgb: packed_rgb(&rgb)?,
                    width: rgb.width(),
                    height: rgb.height(),
                    pts,
                }));
            }
            if self.flushed {
                return Ok(None);
            }

            let track = self.track;
            let packet = self
                .input
                .packets()
                .find_map(|(stream, packet)| (stream.index() == track).then_some(packet));
            if let Some(packet) = packet {
                self.codec.send_packet(&packet).context("decode packet")?;
            } else {
                self.codec.send_eof().context("drain decoder")?;
                self.flushed = true;
            }
        }
    }

    fn seek(&mut self, index: u64) -> Result<()> {
        let target = index as f64 / self.fps;
        let ts = (target * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        self.input
            .seek(ts, ..ts)
            .with_context(|| format!("seek to frame {index}"))?;
        self.codec.flush();
        self.flushed = false;
        self.discard_before = Some(target);
        self.next_index = index;
        Ok(())
    }
}

pub struct FileSource {
    settings: SourceSettings,
    path: String,
    decoder: Option<VideoDecoder>,
    stats: SourceStats,
    /// Added to container timestamps so looped playback stays monotonic.
    loop_offset: f64,
    last_pts: Option<f64>,
    last_read_failed: bool,
}

impl FileSource {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        let path = settings
            .url
            .strip_prefix("file://")
            .unwrap_or(&settings.url)
            .to_string();
        if path.trim().is_empty() || path.contains("://") {
            return Err(anyhow!("file source needs a local path, got {}", settings.url));
        }
        ffmpeg::init().context("initialize ffmpeg")?;
        let stats = SourceStats {
            url: path.clone(),
            ..SourceStats::default()
        };
        Ok(Self {
            settings,
            path,
            decoder: None,
            stats,
            loop_offset: 0.0,
            last_pts: None,
            last_read_failed: false,
        })
    }

    fn decoder(&mut self) -> Result<&mut VideoDecoder> {
        let path = &self.path;
        self.decoder
            .as_mut()
            .ok_or_else(|| anyhow!("file source {path} is not connected"))
    }

    fn rewind(&mut self) -> Result<()> {
        let start = self.settings.start_frame;
        let decoder = self.decoder()?;
        decoder.seek(start)?;
        let restart_pts = start as f64 / decoder.fps;
        let step = 1.0 / self.settings.target_fps;
        self.loop_offset = match self.last_pts {
            Some(last) => last + step - restart_pts,
            None => 0.0,
        };
        log::info!(
            "FileSource: looping {} from frame {} (offset {:.3}s)",
            self.path,
            start,
            self.loop_offset
        );
        Ok(())
    }
}

impl FrameSource for FileSource {
    fn connect(&mut self) -> Result<()> {
        self.decoder = Some(VideoDecoder::open(&self.path, self.settings.target_fps)?);
        self.last_read_failed = false;
        log::info!("FileSource: opened {}", self.path);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = self.decoder()?.next();
        if matches!(decoded, Ok(None))
            && self.settings.loop_playback
            && self.stats.frames_captured > 0
        {
            self.rewind()?;
            decoded = self.decoder()?.next();
        }

        let frame = match decoded {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.stats.read_failures += 1;
                self.last_read_failed = true;
                return Err(err);
            }
        };
        let pts = frame.pts + self.loop_offset;
        self.stats.frames_captured += 1;
        self.last_pts = Some(pts);
        self.last_read_failed = false;
        Frame::from_rgb(frame.rgb, frame.width, frame.height, pts).map(Some)
    }

    fn seek(&mut self, index: u64) -> Result<()> {
        self.decoder()?.seek(index)?;
        log::debug!("FileSource: positioned {} at frame {}", self.path, index);
        Ok(())
    }

    fn reconnect(&mut self) -> Result<()> {
        self.stats.reconnects += 1;
        self.release();
        self.connect()?;
        // Continue after the last delivered frame.
        let resume = match self.last_pts {
            Some(last) => {
                let fps = self.decoder()?.fps;
                ((last - self.loop_offset) * fps).round().max(0.0) as u64 + 1
            }
            None => self.settings.start_frame,
        };
        if resume > 0 {
            self.seek(resume)?;
        }
        Ok(())
    }

    fn release(&mut self) {
        if self.decoder.take().is_some() {
            log::debug!("FileSource: closed {}", self.path);
        }
    }

    fn is_healthy(&self) -> bool {
        self.decoder.is_some() && !self.last_read_failed
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

/// Copy plane 0 into tightly packed RGB rows, dropping any stride padding.
fn packed_rgb(frame: &ffmpeg::frame::Video) -> Result<Vec<u8>> {
    let packed = frame.width() as usize * 3;
    let rows = frame.height() as usize;
    let stride = frame.stride(0).max(packed);
    let plane = frame.data(0);
    if rows == 0 || packed == 0 {
        return Ok(Vec::new());
    }
    if plane.len() < stride * (rows - 1) + packed {
        return Err(anyhow!("decoded plane too short for {}x{} RGB", frame.width(), rows));
    }
    let mut rgb = Vec::with_capacity(packed * rows);
    for row in plane.chunks(stride).take(rows) {
        rgb.extend_from_slice(&row[..packed]);
    }
    Ok(rgb)
}
