//! Timelapse command - capture stills on an interval, then encode

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use shutter_core::output::naming;
use shutter_core::FrameAccumulator;
use tokio::process::Command;
use tokio::signal;
use tracing::{debug, warn};

/// Arguments for the timelapse command
#[derive(Args)]
pub struct TimelapseArgs {
    /// Shell command that writes one JPEG or PNG still to stdout
    #[arg(short, long)]
    capture_cmd: String,

    /// Milliseconds between captures (overrides config)
    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// Playback framerate (overrides config)
    #[arg(short, long)]
    fps: Option<u32>,

    /// Stop after this many stills (default: run until Ctrl+C)
    #[arg(short = 'n', long)]
    count: Option<usize>,

    /// Output file (default: TIMELAPSE_<timestamp>.mp4 in the video directory)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Use this config file instead of the default
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Run one capture command and return its stdout
async fn capture_still(cmd: Arc<String>) -> Option<Vec<u8>> {
    match Command::new("sh").arg("-c").arg(cmd.as_str()).output().await {
        Ok(out) if out.status.success() && !out.stdout.is_empty() => Some(out.stdout),
        Ok(out) => {
            warn!(
                "Capture command exited with {} ({} bytes)",
                out.status,
                out.stdout.len()
            );
            None
        }
        Err(e) => {
            warn!("Failed to run capture command: {}", e);
            None
        }
    }
}

/// Capture a timelapse
pub async fn timelapse(args: TimelapseArgs) -> Result<()> {
    println!("Shutter - Timelapse Capture\n");

    let file = super::load_config(args.config.as_ref())?;
    let mut config = file.timelapse_config()?;
    if let Some(ms) = args.interval_ms {
        config = config.with_capture_interval(Duration::from_millis(ms));
    }
    if let Some(fps) = args.fps {
        config = config.with_output_fps(fps);
    }
    config
        .validate_strict()
        .map_err(|e| anyhow::anyhow!("Invalid settings: {}", e))?;

    let output = match args.output {
        Some(path) => path,
        None => naming::next_output_path(&file.output.directory(), &file.output.timelapse_prefix)?,
    };

    println!("Configuration:");
    println!("  Command:     {}", args.capture_cmd);
    println!("  Interval:    {} ms", config.capture_interval.as_millis());
    println!("  Framerate:   {} fps", config.output_fps);
    if let Some(count) = args.count {
        println!("  Stills:      {}", count);
    }
    println!("  Output:      {}", output.display());
    println!();
    println!("Press Ctrl+C to stop capturing...\n");

    let cmd = Arc::new(args.capture_cmd);
    let mut accumulator = FrameAccumulator::new();
    let mut frame_count = accumulator.subscribe_frame_count();
    accumulator.start(config.capture_interval, config.output_fps, move || {
        capture_still(Arc::clone(&cmd))
    });

    let target = args.count;
    let fps = config.output_fps;
    let enough = async {
        loop {
            if frame_count.changed().await.is_err() {
                break;
            }
            let captured = *frame_count.borrow();
            println!(
                "  Captured {} stills ({:.2}s of video)",
                captured,
                captured as f64 / fps as f64
            );
            if target.is_some_and(|n| captured >= n) {
                break;
            }
        }
    };

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            println!("\nReceived interrupt signal...");
        }
        _ = enough => {
            debug!("Reached requested still count");
        }
    }

    let mut frames = accumulator.stop().await;
    if let Some(n) = target {
        frames.truncate(n);
    }
    if frames.is_empty() {
        bail!("No stills were captured; check the capture command");
    }

    println!("Encoding {} stills...", frames.len());
    let report = super::encode_with_progress(config, frames, output)
        .await
        .context("Timelapse encode failed")?;
    super::print_report(&report);

    Ok(())
}
