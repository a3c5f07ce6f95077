//! Synthetic lot source (`stub://` URLs).
//!
//! Produces a flat asphalt-grey frame with light sensor noise. Every 50 frames the scene
//! changes: a striped, motorcycle-sized block appears in, or leaves, one of a few fixed
//! slots. Timestamps advance by exactly `1 / target_fps`.
//!
//! URL query parameters: `seed=<u64>` fixes the noise, `frames=<n>` ends the stream
//! after `n` frames.

use anyhow::{anyhow, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{FrameSource, SourceSettings, SourceStats};
use crate::frame::Frame;

const SCENE_PERIOD: u64 = 50;
const ASPHALT: u8 = 110;
const NOISE: i16 = 2;

pub struct SyntheticSource {
    settings: SourceSettings,
    seed: u64,
    frame_limit: Option<u64>,
    rng: StdRng,
    frame_count: u64,
    scene_state: u8,
    connected: bool,
    reconnects: u64,
}

impl SyntheticSource {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        if !settings.url.starts_with("stub://") {
            return Err(anyhow!("synthetic source requires a stub:// url"));
        }
        let (seed, frame_limit) = parse_query(&settings.url)?;
        Ok(Self {
            settings,
            seed,
            frame_limit,
            rng: StdRng::seed_from_u64(seed),
            frame_count: 0,
            scene_state: 0,
            connected: false,
            reconnects: 0,
        })
    }

    /// Slot index currently holding a block, if any.
    pub fn occupied_slot(&self) -> Option<usize> {
        (self.scene_state % 2 == 1).then_some((self.scene_state / 2) as usize % 3)
    }

    fn render(&mut self) -> Result<Frame> {
        let (w, h) = (self.settings.width, self.settings.height);
        let pts = self.frame_count as f64 / self.settings.target_fps;
        let pixel_count = w as usize * h as usize;
        let mut data = Vec::with_capacity(pixel_count * 3);
        for _ in 0..pixel_count {
            let v = (ASPHALT as i16 + self.rng.gen_range(-NOISE..=NOISE)) as u8;
            data.extend_from_slice(&[v, v, v]);
        }
        let mut frame = Frame::from_rgb(data, w, h, pts)?;

        if let Some(slot) = self.occupied_slot() {
            // Slots split the width in thirds; the block keeps a 0.6 aspect ratio.
            let slot_w = w / 3;
            let block_h = (h / 2).max(2);
            let block_w = ((block_h as f64 * 0.6) as u32).min(slot_w).max(1);
            let x0 = slot as u32 * slot_w + slot_w.saturating_sub(block_w) / 2;
            let y0 = h / 4;
            for row in 0..block_h {
                let v = if (row / 2) % 2 == 0 { 240 } else { 20 };
                frame.fill_rect(x0, y0 + row, block_w, 1, [v, v, v]);
            }
        }
        Ok(frame)
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{}, seed {})",
            self.settings.url,
            self.settings.width,
            self.settings.height,
            self.seed
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("synthetic source is not connected"));
        }
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        if self.frame_count > 0 && self.frame_count.is_multiple_of(SCENE_PERIOD) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let frame = self.render()?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn seek(&mut self, index: u64) -> Result<()> {
        self.frame_count = index;
        self.scene_state = (index / SCENE_PERIOD) as u8;
        Ok(())
    }

    fn reconnect(&mut self) -> Result<()> {
        self.reconnects += 1;
        self.release();
        self.connect()
    }

    fn release(&mut self) {
        self.connected = false;
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            read_failures: 0,
            reconnects: self.reconnects,
            url: self.settings.url.clone(),
        }
    }
}

fn parse_query(url: &str) -> Result<(u64, Option<u64>)> {
    let mut seed = 0u64;
    let mut frames = None;
    let Some((_, query)) = url.split_once('?') else {
        return Ok((seed, frames));
    };
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("malformed stub query parameter '{}'", pair))?;
        match key {
            "seed" => seed = value.parse().context("stub seed must be an integer")?,
            "frames" => {
                frames = Some(value.parse().context("stub frame count must be an integer")?)
            }
            other => return Err(anyhow!("unknown stub query parameter '{}'", other)),
        }
    }
    Ok((seed, frames))
}
