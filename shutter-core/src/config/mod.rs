//! Configuration types for Shutter
//!
//! Provides recording quality presets, timelapse encoder settings, and
//! runtime configuration.

mod file;

pub use file::{sample_config, ConfigFile, OutputSettings, RecordingSettings, TimelapseSettings};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::output::naming;
use crate::types::ContainerFormat;

/// Canonical timelapse output width
pub const TIMELAPSE_WIDTH: u32 = 1920;
/// Canonical timelapse output height
pub const TIMELAPSE_HEIGHT: u32 = 1080;
/// Timelapse bitrate in bits per second
pub const TIMELAPSE_BITRATE_BPS: u64 = 10_000_000;
/// Seconds between key frames
pub const I_FRAME_INTERVAL_SECS: u32 = 1;
/// Bounded wait for encoder buffer dequeues
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(10);

/// Live recording quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum VideoQualityPreset {
    /// 3840x2160 @ 30fps, 50 Mbps
    #[serde(rename = "UHD_30")]
    Uhd30,
    /// 1920x1080 @ 60fps, 20 Mbps
    #[serde(rename = "FHD_60")]
    Fhd60,
    /// 1920x1080 @ 30fps, 10 Mbps (default)
    #[default]
    #[serde(rename = "FHD_30")]
    Fhd30,
    /// 1280x720 @ 30fps, 5 Mbps
    #[serde(rename = "HD_30")]
    Hd30,
    /// 640x480 @ 30fps, 2 Mbps
    #[serde(rename = "SD_30")]
    Sd30,
}

impl VideoQualityPreset {
    /// Every preset, highest quality first
    pub const ALL: [Self; 5] = [Self::Uhd30, Self::Fhd60, Self::Fhd30, Self::Hd30, Self::Sd30];

    /// Get width in pixels
    pub fn width(&self) -> u32 {
        match self {
            Self::Uhd30 => 3840,
            Self::Fhd60 | Self::Fhd30 => 1920,
            Self::Hd30 => 1280,
            Self::Sd30 => 640,
        }
    }

    /// Get height in pixels
    pub fn height(&self) -> u32 {
        match self {
            Self::Uhd30 => 2160,
            Self::Fhd60 | Self::Fhd30 => 1080,
            Self::Hd30 => 720,
            Self::Sd30 => 480,
        }
    }

    /// Get framerate
    pub fn fps(&self) -> u32 {
        match self {
            Self::Fhd60 => 60,
            Self::Uhd30 | Self::Fhd30 | Self::Hd30 | Self::Sd30 => 30,
        }
    }

    /// Get bitrate in bits per second
    pub fn bitrate_bps(&self) -> u64 {
        match self {
            Self::Uhd30 => 50_000_000,
            Self::Fhd60 => 20_000_000,
            Self::Fhd30 => 10_000_000,
            Self::Hd30 => 5_000_000,
            Self::Sd30 => 2_000_000,
        }
    }

    /// Get resolution as (width, height) tuple
    pub fn resolution(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    /// Canonical preset name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uhd30 => "UHD_30",
            Self::Fhd60 => "FHD_60",
            Self::Fhd30 => "FHD_30",
            Self::Hd30 => "HD_30",
            Self::Sd30 => "SD_30",
        }
    }
}

impl std::fmt::Display for VideoQualityPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for VideoQualityPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "uhd_30" | "uhd30" | "4k30" | "2160p30" => Ok(Self::Uhd30),
            "fhd_60" | "fhd60" | "1080p60" => Ok(Self::Fhd60),
            "fhd_30" | "fhd30" | "1080p30" => Ok(Self::Fhd30),
            "hd_30" | "hd30" | "720p30" => Ok(Self::Hd30),
            "sd_30" | "sd30" | "480p30" => Ok(Self::Sd30),
            _ => Err(format!("Unknown quality preset: {}", s)),
        }
    }
}

/// What to do when a buffered still cannot be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DecodeFailurePolicy {
    /// Drop the frame and keep encoding; the video gets one frame shorter
    #[default]
    Skip,
    /// Fail the whole encode run
    Abort,
}

impl std::str::FromStr for DecodeFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            _ => Err(format!("Unknown decode failure policy: {}", s)),
        }
    }
}

/// Settings for one offline timelapse encode run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelapseConfig {
    /// Playback framerate of the synthesized video
    pub output_fps: u32,
    /// Output width
    pub width: u32,
    /// Output height
    pub height: u32,
    /// Bitrate in bits per second
    pub bitrate_bps: u64,
    /// Seconds between key frames
    pub i_frame_interval_secs: u32,
    /// Real time between captures
    pub capture_interval: Duration,
    /// Handling of undecodable stills
    pub decode_failure_policy: DecodeFailurePolicy,
    /// Fail the run if the encoder makes no progress for this long
    pub stall_timeout: Option<Duration>,
    /// Force a specific FFmpeg encoder (e.g. "libx264")
    pub encoder: Option<String>,
    /// Output container
    pub container: ContainerFormat,
}

impl Default for TimelapseConfig {
    fn default() -> Self {
        Self {
            output_fps: 30,
            width: TIMELAPSE_WIDTH,
            height: TIMELAPSE_HEIGHT,
            bitrate_bps: TIMELAPSE_BITRATE_BPS,
            i_frame_interval_secs: I_FRAME_INTERVAL_SECS,
            capture_interval: Duration::from_millis(2000),
            decode_failure_policy: DecodeFailurePolicy::Skip,
            stall_timeout: None,
            encoder: None,
            container: ContainerFormat::Mp4,
        }
    }
}

impl TimelapseConfig {
    /// Set the output framerate
    pub fn with_output_fps(mut self, fps: u32) -> Self {
        self.output_fps = fps;
        self
    }

    /// Set the output resolution
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the bitrate in bits per second
    pub fn with_bitrate(mut self, bitrate_bps: u64) -> Self {
        self.bitrate_bps = bitrate_bps;
        self
    }

    /// Set the capture interval
    pub fn with_capture_interval(mut self, interval: Duration) -> Self {
        self.capture_interval = interval;
        self
    }

    /// Set the decode failure policy
    pub fn with_decode_failure_policy(mut self, policy: DecodeFailurePolicy) -> Self {
        self.decode_failure_policy = policy;
        self
    }

    /// Set the encoder stall timeout
    pub fn with_stall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Force a specific FFmpeg encoder
    pub fn with_encoder(mut self, encoder: impl Into<String>) -> Self {
        self.encoder = Some(encoder.into());
        self
    }

    /// Duration of one output frame in microseconds
    pub fn frame_duration_us(&self) -> i64 {
        1_000_000 / self.output_fps.max(1) as i64
    }

    /// Presentation timestamp of the n-th encoded frame
    pub fn presentation_time_us(&self, frame_index: u64) -> i64 {
        frame_index as i64 * self.frame_duration_us()
    }

    /// Key frame distance in frames
    pub fn gop_size(&self) -> u32 {
        (self.output_fps * self.i_frame_interval_secs).max(1)
    }

    /// Validate the configuration and return any warnings
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.output_fps > 60 {
            warnings.push(format!(
                "Output framerate {}fps is unusually high for a timelapse",
                self.output_fps
            ));
        }

        if self.capture_interval < Duration::from_millis(1000 / self.output_fps.max(1) as u64)
        {
            warnings.push(
                "Capture interval is shorter than one output frame; the video will play slower than real time"
                    .to_string(),
            );
        }

        let pixels_per_second =
            self.width as u64 * self.height as u64 * self.output_fps as u64;
        if pixels_per_second > 0 && self.bitrate_bps * 100 / pixels_per_second < 2 {
            warnings.push(format!(
                "Bitrate {} bps is very low for {}x{} @ {}fps",
                self.bitrate_bps, self.width, self.height, self.output_fps
            ));
        }

        warnings
    }

    /// Validate and return an error if configuration is invalid
    pub fn validate_strict(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err("Resolution cannot be zero".to_string());
        }

        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(format!(
                "Resolution {}x{} must be even for 4:2:0 chroma subsampling",
                self.width, self.height
            ));
        }

        if self.output_fps == 0 {
            return Err("Framerate cannot be zero".to_string());
        }

        if self.output_fps > 240 {
            return Err(format!(
                "Framerate {} exceeds maximum supported (240)",
                self.output_fps
            ));
        }

        if self.bitrate_bps == 0 {
            return Err("Bitrate cannot be zero".to_string());
        }

        if self.capture_interval.is_zero() {
            return Err("Capture interval cannot be zero".to_string());
        }

        Ok(())
    }
}

/// Settings for live recording sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingConfig {
    /// Quality preset
    pub quality: VideoQualityPreset,
    /// Record an audio track
    pub audio_enabled: bool,
    /// Directory recordings are written to
    pub output_dir: PathBuf,
    /// File name prefix
    pub prefix: String,
    /// Force a specific FFmpeg encoder
    pub encoder: Option<String>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            quality: VideoQualityPreset::default(),
            audio_enabled: false,
            output_dir: naming::default_video_dir(),
            prefix: naming::VIDEO_PREFIX.to_string(),
            encoder: None,
        }
    }
}

impl RecordingConfig {
    /// Set the quality preset
    pub fn with_quality(mut self, quality: VideoQualityPreset) -> Self {
        self.quality = quality;
        self
    }

    /// Enable or disable the audio track
    pub fn with_audio(mut self, enabled: bool) -> Self {
        self.audio_enabled = enabled;
        self
    }

    /// Set the output directory
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the file name prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}
