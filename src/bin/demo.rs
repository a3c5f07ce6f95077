//! demo - end-to-end synthetic run of the occupancy kernel
//!
//! Builds a three-space lot, scripts a motorcycle parking in space 1 and leaving again,
//! runs the frames through a real session worker and prints every confirmed transition
//! followed by the final snapshot, one JSON object per line.

use anyhow::{anyhow, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use occupancy_kernel::session::SessionOptions;
use occupancy_kernel::{
    DetectorSettings, DocumentFormat, Frame, GeometryStore, LotDetector, ScriptStep,
    ScriptedSource, Session, SessionEvent,
};

const WIDTH: u32 = 120;
const HEIGHT: u32 = 80;
const ASPHALT: u8 = 120;

const LOT: &str = r#"
frame_dimensions:
  width: 120
  height: 80
spots:
  - id: 1
    coordinates: [[5, 5], [35, 5], [35, 55], [5, 55]]
  - id: 2
    coordinates: [[45, 5], [75, 5], [75, 55], [45, 55]]
  - id: 3
    coordinates: [[85, 5], [115, 5], [115, 55], [85, 55]]
"#;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Frames per second of the scripted stream.
    #[arg(long, default_value_t = 10)]
    fps: u32,
    /// Empty-lot frames before the motorcycle arrives.
    #[arg(long, default_value_t = 250)]
    warmup: u32,
    /// Frames the motorcycle stays parked.
    #[arg(long, default_value_t = 40)]
    parked: u32,
    /// Empty-lot frames after it leaves.
    #[arg(long, default_value_t = 30)]
    after: u32,
    /// Deterministic seed for sensor noise.
    #[arg(long, default_value_t = 7)]
    seed: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("--fps must be positive"));
    }

    let geometry = GeometryStore::parse(LOT, DocumentFormat::Yaml)?;
    let detector = LotDetector::new(geometry, DetectorSettings::default())?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let total = args.warmup + args.parked + args.after;
    let mut steps = Vec::with_capacity(total as usize);
    for k in 0..total {
        let pts = k as f64 / args.fps as f64;
        let parked = k >= args.warmup && k < args.warmup + args.parked;
        steps.push(ScriptStep::Frame(lot_frame(&mut rng, pts, parked)?));
    }
    let source = ScriptedSource::new("demo://lot", steps);

    let options = SessionOptions {
        target_fps: None,
        ..SessionOptions::default()
    };
    let handle = Session::new(detector, Box::new(source), options).start()?;

    for event in handle.events().iter() {
        match event {
            SessionEvent::Transition { id, status, pts } => {
                println!(
                    "{}",
                    json!({"event": "transition", "id": id, "status": status, "pts": pts})
                );
            }
            SessionEvent::Stopped => break,
            _ => {}
        }
    }

    let snapshot = handle.latest();
    let summary = handle.wait()?;
    println!("{}", snapshot.to_json()?);
    eprintln!(
        "demo processed {} frames ({} skipped)",
        summary.frames_processed, summary.frames_skipped
    );
    Ok(())
}

/// Noisy empty lot, optionally with a striped 16x28 motorcycle inside space 1.
fn lot_frame(rng: &mut StdRng, pts: f64, parked: bool) -> Result<Frame> {
    let mut data = Vec::with_capacity((WIDTH * HEIGHT * 3) as usize);
    for _ in 0..WIDTH * HEIGHT {
        let v = ASPHALT.saturating_add_signed(rng.gen_range(-1..=1));
        data.extend_from_slice(&[v, v, v]);
    }
    let mut frame = Frame::from_rgb(data, WIDTH, HEIGHT, pts)?;
    if parked {
        for row in 0..28 {
            let v = if (row / 2) % 2 == 0 { 250 } else { 10 };
            frame.fill_rect(12, 15 + row, 16, 1, [v, v, v]);
        }
    }
    Ok(frame)
}
