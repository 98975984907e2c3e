//! Output file naming
//!
//! Videos are named `{prefix}_{yyyyMMdd_HHmmss}.mp4` and written to an
//! app-scoped directory under the user's video folder.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;
use crate::types::ContainerFormat;

/// Prefix for live recordings
pub const VIDEO_PREFIX: &str = "VID";

/// Prefix for synthesized timelapses
pub const TIMELAPSE_PREFIX: &str = "TIMELAPSE";

/// Application folder inside the video directory
const APP_DIR: &str = "Shutter";

/// File name for a video started at `now`
pub fn output_file_name(prefix: &str, now: DateTime<Local>, container: ContainerFormat) -> String {
    format!(
        "{}_{}.{}",
        prefix,
        now.format("%Y%m%d_%H%M%S"),
        container.extension()
    )
}

/// Default directory videos are written to
pub fn default_video_dir() -> PathBuf {
    if let Some(videos) = dirs::video_dir() {
        videos.join(APP_DIR)
    } else if let Some(data) = dirs::data_dir() {
        data.join("shutter").join("videos")
    } else {
        PathBuf::from("videos")
    }
}

/// Create `dir` if needed and return a fresh output path inside it
pub fn next_output_path(dir: &Path, prefix: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(output_file_name(prefix, Local::now(), ContainerFormat::Mp4));
    debug!("Next output path: {:?}", path);
    Ok(path)
}
