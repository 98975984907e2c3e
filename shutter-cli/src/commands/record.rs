//! Record command - live recording of a synthetic test pattern

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use shutter_core::config::VideoQualityPreset;
use shutter_core::types::{Frame, FrameFormat, PixelFormat};
use shutter_core::{CaptureTarget, FfmpegRecorderBackend, RecordingSession};
use tokio::signal;
use tracing::{debug, info};

/// Pattern frame size; the recorder scales it to the preset resolution
const PATTERN_WIDTH: u32 = 640;
const PATTERN_HEIGHT: u32 = 360;

/// Arguments for the record command
#[derive(Args)]
pub struct RecordArgs {
    /// Quality preset (UHD_30, FHD_60, FHD_30, HD_30, SD_30; overrides config)
    #[arg(short, long)]
    quality: Option<String>,

    /// Stop after this many seconds (default: run until Ctrl+C)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Record audio as well
    #[arg(short, long)]
    audio: bool,

    /// Output directory (overrides config)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Use this config file instead of the default
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Moving color bars in RGB24
fn test_pattern(index: u64) -> Frame {
    let shift = (index * 4) as u32;
    let mut data = Vec::with_capacity((PATTERN_WIDTH * PATTERN_HEIGHT * 3) as usize);
    for y in 0..PATTERN_HEIGHT {
        for x in 0..PATTERN_WIDTH {
            let bar = ((x + shift) / 80) % 8;
            let shade = (255 * y / PATTERN_HEIGHT) as u8;
            data.extend_from_slice(&[
                if bar & 1 != 0 { 255 } else { shade / 4 },
                if bar & 2 != 0 { 255 } else { shade / 4 },
                if bar & 4 != 0 { 255 } else { shade },
            ]);
        }
    }

    Frame {
        format: FrameFormat {
            width: PATTERN_WIDTH,
            height: PATTERN_HEIGHT,
            pixel_format: PixelFormat::Rgb24,
        },
        data,
        pts: index,
    }
}

/// Push pattern frames into `target` at `fps` until aborted
async fn feed_pattern(target: CaptureTarget, fps: u32) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / fps.max(1));
    let mut index = 0u64;
    loop {
        ticker.tick().await;
        if !target.submit(test_pattern(index)) {
            debug!("Pattern frame {} dropped", index);
        }
        index += 1;
    }
}

/// Record the test pattern
pub async fn record(args: RecordArgs) -> Result<()> {
    println!("Shutter - Live Recording\n");

    let file = super::load_config(args.config.as_ref())?;
    let mut config = file.recording_config()?;
    if let Some(ref quality) = args.quality {
        config.quality = quality
            .parse::<VideoQualityPreset>()
            .map_err(|e| anyhow::anyhow!("{}. Run `shutter presets` for the list", e))?;
    }
    if let Some(dir) = args.output_dir {
        config = config.with_output_dir(dir);
    }
    let audio = args.audio || config.audio_enabled;
    let quality = config.quality;

    println!("Configuration:");
    println!("  Preset:      {}", quality);
    println!("  Resolution:  {}x{}", quality.width(), quality.height());
    println!("  Framerate:   {} fps", quality.fps());
    println!("  Bitrate:     {} kbps", quality.bitrate_bps() / 1000);
    println!("  Audio:       {}", if audio { "on" } else { "off" });
    println!("  Directory:   {}", config.output_dir.display());
    println!();

    let mut session = RecordingSession::new(FfmpegRecorderBackend, &config)
        .with_registrar(|path| info!("Registered recording {:?}", path));

    let target = session
        .prepare(quality, audio)
        .context("Failed to prepare recorder")?;
    session.start().context("Failed to start recording")?;

    let feeder = tokio::spawn(feed_pattern(target.clone(), quality.fps()));
    let mut elapsed = session.subscribe_duration();

    println!("Recording... press Ctrl+C to stop\n");

    let limit = args.duration.map(Duration::from_secs);
    let until_limit = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    let report = async {
        while elapsed.changed().await.is_ok() {
            let ms = *elapsed.borrow();
            println!("  {:>6.1}s", ms as f64 / 1000.0);
        }
    };

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            println!("\nReceived interrupt signal...");
        }
        _ = until_limit => {
            debug!("Recording duration reached");
        }
        _ = report => {}
    }

    feeder.abort();
    let stats = session.recorder_stats().unwrap_or_default();
    let duration = session.duration();

    println!("Stopping recording...");
    let saved = session.stop();
    session.release();

    match saved {
        Some(path) => {
            println!("Recording saved: {}", path.display());
            println!("  Duration: {:.1}s", duration.as_secs_f64());
            println!("  Frames:   {}", stats.frames_encoded);
            if stats.frames_dropped + target.dropped_frames() > 0 {
                println!(
                    "  Dropped:  {}",
                    stats.frames_dropped + target.dropped_frames()
                );
            }
            Ok(())
        }
        None => bail!("Recording could not be finalized (run with -v for details)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_frame_layout() {
        let frame = test_pattern(3);
        assert_eq!(
            frame.data.len(),
            PixelFormat::Rgb24.frame_size(PATTERN_WIDTH, PATTERN_HEIGHT)
        );
        assert_eq!(frame.pts, 3);
    }
}
