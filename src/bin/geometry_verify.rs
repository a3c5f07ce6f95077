//! geometry_verify - offline check of a parking-space geometry document
//!
//! This tool proves, before a daemon ever starts:
//! - The document parses (JSON, YAML or TOML by extension)
//! - Every space has exactly four in-frame corners and a unique id
//! - No polygon crosses itself
//!
//! It then reports each space's bounding rectangle, enclosed area and mask size, flags
//! degenerate (zero-area) spaces, and can rewrite the document in another format.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

use occupancy_kernel::{GeometryStore, RegionMaskCache};

#[derive(Parser, Debug)]
#[command(
    name = "geometry_verify",
    about = "Validate a parking-space geometry document and report its masks"
)]
struct Args {
    /// Geometry document (.json, .yml/.yaml or .toml)
    #[arg(env = "OCCUPANCY_GEOMETRY_PATH")]
    path: PathBuf,

    /// Write the validated geometry to this path (format chosen by extension)
    #[arg(long, value_name = "PATH")]
    convert: Option<PathBuf>,

    /// Print the report as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Fail when any space is degenerate
    #[arg(long)]
    strict: bool,
}

#[derive(Serialize)]
struct SpaceReport {
    id: u32,
    rect: [u32; 4],
    area: f64,
    mask_pixels: usize,
    degenerate: bool,
}

#[derive(Serialize)]
struct Report {
    path: String,
    width: u32,
    height: u32,
    fingerprint: String,
    spaces: Vec<SpaceReport>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let store = GeometryStore::load(&args.path)?;
    let masks = RegionMaskCache::from_geometry(&store);
    let dims = store.dimensions();

    let report = Report {
        path: args.path.display().to_string(),
        width: dims.width,
        height: dims.height,
        fingerprint: hex::encode(store.fingerprint()),
        spaces: masks
            .masks()
            .iter()
            .map(|mask| SpaceReport {
                id: mask.space_id,
                rect: [mask.rect.x, mask.rect.y, mask.rect.w, mask.rect.h],
                area: mask.area,
                mask_pixels: mask.interior_pixels(),
                degenerate: mask.degenerate,
            })
            .collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{}: {} spaces on a {}x{} frame (fingerprint {})",
            report.path,
            report.spaces.len(),
            report.width,
            report.height,
            &report.fingerprint[..16]
        );
        for space in &report.spaces {
            let [x, y, w, h] = space.rect;
            println!(
                "  space {:>4}: rect x={} y={} w={} h={}  area={:.1}  mask={}{}",
                space.id,
                x,
                y,
                w,
                h,
                space.area,
                space.mask_pixels,
                if space.degenerate { "  DEGENERATE" } else { "" }
            );
        }
    }

    if let Some(out) = &args.convert {
        store
            .save(out)
            .with_context(|| format!("convert geometry to {}", out.display()))?;
        let reloaded = GeometryStore::load(out)?;
        anyhow::ensure!(
            reloaded == store,
            "converted document {} does not reload identically",
            out.display()
        );
        eprintln!("wrote {}", out.display());
    }

    let degenerate = masks.degenerate_count();
    if args.strict && degenerate > 0 {
        anyhow::bail!("{} degenerate space(s) found", degenerate);
    }
    Ok(())
}
