//! Info command - show encoder availability and output locations

use anyhow::Result;
use shutter_core::config::{ConfigFile, VideoQualityPreset};
use shutter_core::encode::{self, EncoderSettings, FfmpegEncoder, HardwareEncoder, H264_ENCODERS};

/// Show system information and encoder capabilities
pub async fn info() -> Result<()> {
    println!("Shutter - System Information\n");

    println!("H.264 Encoders:");
    let available = encode::available_encoders();
    for name in H264_ENCODERS {
        let found = available.iter().any(|a| a == name);
        let icon = if found { "[OK]" } else { "[--]" };
        let kind = if encode::is_hardware_encoder(name) {
            "hardware"
        } else {
            "software"
        };
        println!("  {} {:<14} ({})", icon, name, kind);
    }

    if available.is_empty() {
        println!();
        println!("  No H.264 encoder found.");
        println!("  Make sure FFmpeg was built with libx264, libopenh264, NVENC or V4L2 M2M.");
        println!();
        return Ok(());
    }

    println!();

    // Opening an encoder is the only reliable way to learn what it accepts
    println!("Preset Support (default encoder):");
    let probes = tokio::task::spawn_blocking(|| {
        VideoQualityPreset::ALL
            .into_iter()
            .map(|preset| {
                let result = FfmpegEncoder::new(&EncoderSettings::from_preset(preset, None)).map(
                    |mut encoder| {
                        let name = encoder.name();
                        encoder.release();
                        name
                    },
                );
                (preset, result)
            })
            .collect::<Vec<_>>()
    })
    .await?;

    for (preset, result) in probes {
        match result {
            Ok(name) => println!("  [OK] {:<7} via {}", preset.name(), name),
            Err(e) => println!("  [!!] {:<7} {}", preset.name(), e),
        }
    }

    println!();
    println!("Files:");
    println!("  Config:  {}", ConfigFile::default_path().display());
    let config = ConfigFile::load_or_default();
    println!("  Videos:  {}", config.output.directory().display());

    Ok(())
}
