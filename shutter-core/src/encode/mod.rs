//! Video encoding
//!
//! This module provides:
//! - A buffer-slot [`HardwareEncoder`] interface and its FFmpeg implementation
//! - BT.601 RGB to I420 conversion for decoded stills
//! - The drain loop that moves encoded samples into the muxer
//! - The offline timelapse encoder

mod codec;
mod drain;
mod ffmpeg;
mod offline;
mod scaler;
pub mod yuv;

pub use codec::{poll_with_timeout, EncoderSettings, HardwareEncoder, OutputEvent};
pub use drain::{Drain, DrainPhase, DrainTick, MAX_DRAIN_ITERATIONS};
pub use ffmpeg::{select_h264_encoder, FfmpegEncoder, H264_ENCODERS};
pub use offline::{decode_still, EncodeProgress, EncodeReport, OfflineEncoder};
pub use scaler::FrameScaler;

/// Check if any H.264 encoder is available on this system
pub fn h264_available() -> bool {
    !available_encoders().is_empty()
}

/// Get the list of usable H.264 encoders, most preferred first
pub fn available_encoders() -> Vec<String> {
    ffmpeg::list_available_encoders()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Whether `name` is a hardware-accelerated encoder
pub fn is_hardware_encoder(name: &str) -> bool {
    matches!(name, "h264_nvenc" | "h264_v4l2m2m")
}
