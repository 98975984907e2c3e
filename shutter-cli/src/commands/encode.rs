//! Encode command - turn a directory of stills into a timelapse

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use shutter_core::config::DecodeFailurePolicy;
use shutter_core::output::naming;
use shutter_core::RawFrame;
use tracing::{debug, info};

/// Arguments for the encode command
#[derive(Args)]
pub struct EncodeArgs {
    /// Directory containing JPEG or PNG stills, encoded in file name order
    dir: PathBuf,

    /// Output file (default: TIMELAPSE_<timestamp>.mp4 in the video directory)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Playback framerate (overrides config)
    #[arg(short, long)]
    fps: Option<u32>,

    /// Output resolution as WIDTHxHEIGHT (default 1920x1080)
    #[arg(short, long)]
    resolution: Option<String>,

    /// Fail instead of skipping stills that cannot be decoded
    #[arg(long)]
    abort_on_error: bool,

    /// FFmpeg H.264 encoder to use (e.g. libx264)
    #[arg(short, long)]
    encoder: Option<String>,

    /// Use this config file instead of the default
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Encode a directory of stills
pub async fn encode(args: EncodeArgs) -> Result<()> {
    println!("Shutter - Timelapse Encode\n");

    let file = super::load_config(args.config.as_ref())?;
    let mut config = file.timelapse_config()?;

    if let Some(fps) = args.fps {
        config = config.with_output_fps(fps);
    }
    if let Some(ref resolution) = args.resolution {
        let (width, height) = parse_resolution(resolution)?;
        config = config.with_resolution(width, height);
    }
    if args.abort_on_error {
        config = config.with_decode_failure_policy(DecodeFailurePolicy::Abort);
    }
    if let Some(encoder) = args.encoder {
        config = config.with_encoder(encoder);
    }
    config
        .validate_strict()
        .map_err(|e| anyhow::anyhow!("Invalid settings: {}", e))?;
    for warning in config.validate() {
        println!("Warning: {}", warning);
    }

    let frames = load_stills(&args.dir)?;
    if frames.is_empty() {
        bail!("No JPEG or PNG stills found in {}", args.dir.display());
    }

    let output = match args.output {
        Some(path) => path,
        None => naming::next_output_path(&file.output.directory(), &file.output.timelapse_prefix)?,
    };

    println!("Configuration:");
    println!("  Stills:      {}", frames.len());
    println!("  Resolution:  {}x{}", config.width, config.height);
    println!("  Framerate:   {} fps", config.output_fps);
    println!("  Bitrate:     {} kbps", config.bitrate_bps / 1000);
    println!(
        "  Length:      {:.2}s",
        frames.len() as f64 / config.output_fps as f64
    );
    println!("  Output:      {}", output.display());
    println!();

    let report = super::encode_with_progress(config, frames, output)
        .await
        .context("Timelapse encode failed")?;
    super::print_report(&report);

    Ok(())
}

fn parse_resolution(s: &str) -> Result<(u32, u32)> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow::anyhow!("Invalid resolution '{}'. Expected WIDTHxHEIGHT", s))?;
    Ok((
        w.trim().parse().context("Invalid width")?,
        h.trim().parse().context("Invalid height")?,
    ))
}

fn is_still(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

/// Read every still in `dir`, sorted by file name
fn load_stills(dir: &Path) -> Result<Vec<RawFrame>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_still(path))
        .collect();
    paths.sort();

    let mut frames = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        debug!("Loaded {:?} ({} bytes)", path, bytes.len());
        frames.push(RawFrame::new(index, bytes));
    }

    info!("Loaded {} stills from {:?}", frames.len(), dir);
    Ok(frames)
}
