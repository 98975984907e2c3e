//! Configuration file loading and merging
//!
//! Loads user configuration from `~/.config/shutter/config.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DecodeFailurePolicy, RecordingConfig, TimelapseConfig, VideoQualityPreset};
use crate::error::{Result, ShutterError};
use crate::output::naming;

/// Configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Live recording settings
    #[serde(default)]
    pub recording: RecordingSettings,

    /// Timelapse settings
    #[serde(default)]
    pub timelapse: TimelapseSettings,

    /// Output file settings
    #[serde(default)]
    pub output: OutputSettings,
}

/// Live recording settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSettings {
    /// Quality preset (UHD_30, FHD_60, FHD_30, HD_30, SD_30)
    #[serde(default = "default_quality")]
    pub quality: String,

    /// Record an audio track
    #[serde(default)]
    pub audio: bool,

    /// FFmpeg encoder override ("" = auto)
    #[serde(default)]
    pub encoder: String,
}

/// Timelapse capture and encode settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelapseSettings {
    /// Milliseconds between captures
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Playback framerate of the output video
    #[serde(default = "default_output_fps")]
    pub output_fps: u32,

    /// What to do with undecodable stills (skip, abort)
    #[serde(default = "default_decode_policy")]
    pub on_decode_failure: String,

    /// Fail the encode if the encoder stalls this long (0 = wait forever)
    #[serde(default)]
    pub stall_timeout_ms: u64,

    /// FFmpeg encoder override ("" = auto)
    #[serde(default)]
    pub encoder: String,
}

/// Output file settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Directory for videos ("" = platform video directory)
    #[serde(default)]
    pub directory: String,

    /// File name prefix for live recordings
    #[serde(default = "default_video_prefix")]
    pub video_prefix: String,

    /// File name prefix for timelapses
    #[serde(default = "default_timelapse_prefix")]
    pub timelapse_prefix: String,
}

fn default_quality() -> String {
    "FHD_30".to_string()
}

fn default_interval_ms() -> u64 {
    2000
}

fn default_output_fps() -> u32 {
    30
}

fn default_decode_policy() -> String {
    "skip".to_string()
}

fn default_video_prefix() -> String {
    naming::VIDEO_PREFIX.to_string()
}

fn default_timelapse_prefix() -> String {
    naming::TIMELAPSE_PREFIX.to_string()
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            quality: default_quality(),
            audio: false,
            encoder: String::new(),
        }
    }
}

impl Default for TimelapseSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            output_fps: default_output_fps(),
            on_decode_failure: default_decode_policy(),
            stall_timeout_ms: 0,
            encoder: String::new(),
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: String::new(),
            video_prefix: default_video_prefix(),
            timelapse_prefix: default_timelapse_prefix(),
        }
    }
}

impl OutputSettings {
    /// Resolved output directory
    pub fn directory(&self) -> PathBuf {
        if self.directory.is_empty() {
            naming::default_video_dir()
        } else {
            PathBuf::from(&self.directory)
        }
    }
}

impl ConfigFile {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("shutter").join("config.toml")
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("shutter")
                .join("config.toml")
        } else {
            PathBuf::from("/etc/shutter/config.toml")
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| ShutterError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ConfigFile = toml::from_str(&content)
            .map_err(|e| ShutterError::Config(format!("Failed to parse config file: {}", e)))?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration, logging warnings but returning defaults on error
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ShutterError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ShutterError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&path, content)
            .map_err(|e| ShutterError::Config(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Write the annotated sample to `path` unless a file is already there
    ///
    /// Returns whether the file was created.
    pub fn create_default_if_missing(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ShutterError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        std::fs::write(path, sample_config())
            .map_err(|e| ShutterError::Config(format!("Failed to write config file: {}", e)))?;

        info!("Created configuration file {:?}", path);
        Ok(true)
    }

    /// Build the live recording configuration
    pub fn recording_config(&self) -> Result<RecordingConfig> {
        let quality: VideoQualityPreset = self
            .recording
            .quality
            .parse()
            .map_err(ShutterError::Config)?;

        Ok(RecordingConfig {
            quality,
            audio_enabled: self.recording.audio,
            output_dir: self.output.directory(),
            prefix: self.output.video_prefix.clone(),
            encoder: non_empty(&self.recording.encoder),
        })
    }

    /// Build the timelapse configuration
    pub fn timelapse_config(&self) -> Result<TimelapseConfig> {
        let policy: DecodeFailurePolicy = self
            .timelapse
            .on_decode_failure
            .parse()
            .map_err(ShutterError::Config)?;

        let stall_timeout = match self.timelapse.stall_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        let config = TimelapseConfig {
            output_fps: self.timelapse.output_fps,
            capture_interval: Duration::from_millis(self.timelapse.interval_ms),
            decode_failure_policy: policy,
            stall_timeout,
            encoder: non_empty(&self.timelapse.encoder),
            ..TimelapseConfig::default()
        };

        config.validate_strict().map_err(ShutterError::Config)?;
        Ok(config)
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.trim().to_string())
    }
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# Shutter Configuration

[recording]
# Quality preset: UHD_30, FHD_60, FHD_30, HD_30, SD_30
quality = "FHD_30"

# Record an audio track alongside video
audio = false

# FFmpeg H.264 encoder to use ("" = first available of
# h264_nvenc, h264_v4l2m2m, libx264, libopenh264)
encoder = ""

[timelapse]
# Real time between captured stills, in milliseconds
interval_ms = 2000

# Playback framerate of the timelapse video (commonly 24 or 30)
output_fps = 30

# Undecodable stills: "skip" drops the frame, "abort" fails the whole video
on_decode_failure = "skip"

# Fail the encode if the encoder makes no progress for this long
# (0 = wait indefinitely)
stall_timeout_ms = 0

# FFmpeg H.264 encoder override ("" = auto)
encoder = ""

[output]
# Where videos are written ("" = ~/Videos/Shutter)
directory = ""

# File names are {prefix}_{yyyyMMdd_HHmmss}.mp4
video_prefix = "VID"
timelapse_prefix = "TIMELAPSE"
"#
    .to_string()
}
