//! Presets command - list recording quality presets

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use shutter_core::config::VideoQualityPreset;

/// Arguments for the presets command
#[derive(Args)]
pub struct PresetsArgs {
    /// Print as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct PresetInfo {
    name: &'static str,
    width: u32,
    height: u32,
    fps: u32,
    bitrate_bps: u64,
    default: bool,
}

impl From<VideoQualityPreset> for PresetInfo {
    fn from(preset: VideoQualityPreset) -> Self {
        Self {
            name: preset.name(),
            width: preset.width(),
            height: preset.height(),
            fps: preset.fps(),
            bitrate_bps: preset.bitrate_bps(),
            default: preset == VideoQualityPreset::default(),
        }
    }
}

/// List quality presets
pub fn presets(args: PresetsArgs) -> Result<()> {
    let presets: Vec<PresetInfo> = VideoQualityPreset::ALL.into_iter().map(Into::into).collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&presets)?);
        return Ok(());
    }

    println!("Recording Quality Presets:\n");
    println!("  {:<8} {:>11} {:>5} {:>10}", "NAME", "RESOLUTION", "FPS", "BITRATE");
    for p in &presets {
        println!(
            "  {:<8} {:>11} {:>5} {:>7} Mb{}",
            p.name,
            format!("{}x{}", p.width, p.height),
            p.fps,
            p.bitrate_bps / 1_000_000,
            if p.default { "  (default)" } else { "" }
        );
    }

    Ok(())
}
