//! CLI command implementations

mod config;
mod encode;
mod info;
mod presets;
mod record;
mod timelapse;

pub use config::{config, ConfigArgs};
pub use encode::{encode, EncodeArgs};
pub use info::info;
pub use presets::{presets, PresetsArgs};
pub use record::{record, RecordArgs};
pub use timelapse::{timelapse, TimelapseArgs};

use anyhow::Result;
use shutter_core::config::{ConfigFile, TimelapseConfig};
use shutter_core::encode::EncodeProgress;
use shutter_core::{EncodeReport, OfflineEncoder, RawFrame};
use std::path::PathBuf;
use tokio::sync::watch;

/// Load the user config, falling back to defaults on error
pub(crate) fn load_config(path: Option<&PathBuf>) -> Result<ConfigFile> {
    match path {
        Some(path) => Ok(ConfigFile::load_from(path.clone())?),
        None => Ok(ConfigFile::load_or_default()),
    }
}

/// Encode `frames` to `output`, printing progress as stills are consumed
pub(crate) async fn encode_with_progress(
    config: TimelapseConfig,
    frames: Vec<RawFrame>,
    output: PathBuf,
) -> Result<EncodeReport> {
    let encoder = OfflineEncoder::new(config);
    let progress = encoder.subscribe_progress();
    let printer = tokio::spawn(print_progress(progress));

    let result = encoder.encode_in_background(frames, output).await;
    printer.abort();
    println!();

    Ok(result?)
}

async fn print_progress(mut rx: watch::Receiver<EncodeProgress>) {
    use std::io::Write;

    while rx.changed().await.is_ok() {
        let p = *rx.borrow();
        print!(
            "\r  Encoding: {:>5.1}% ({} encoded, {} skipped of {})",
            p.fraction() * 100.0,
            p.encoded,
            p.skipped,
            p.total
        );
        let _ = std::io::stdout().flush();
    }
}

/// Print the summary of a finished encode
pub(crate) fn print_report(report: &EncodeReport) {
    println!("Timelapse saved: {}", report.path.display());
    println!("  Frames:   {}", report.frames_encoded);
    if report.frames_skipped > 0 {
        println!("  Skipped:  {} (undecodable)", report.frames_skipped);
    }
    println!("  Samples:  {}", report.samples_written);
    println!("  Duration: {:.2}s", report.duration_secs());
}
