//! Shutter Core Library
//!
//! Camera video recording and timelapse synthesis.
//!
//! This library provides:
//! - Live recording sessions with pause/resume and an elapsed-time observable
//! - Periodic still capture for timelapses
//! - Offline H.264 encoding of buffered stills into MP4 via FFmpeg
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐    ┌────────────────┐    ┌──────────────┐    ┌─────────────┐
//! │ FrameAccumulator │───▶│ OfflineEncoder │───▶│ H.264 Encode │───▶│ OutputMuxer │
//! │ (JPEG stills)    │    │ (decode, I420) │    │ (FFmpeg)     │    │ (MP4)       │
//! └──────────────────┘    └────────────────┘    └──────────────┘    └─────────────┘
//!
//! ┌──────────────────┐    ┌──────────────────┐
//! │ RecordingSession │───▶│ Recorder backend │───▶ H.264 Encode ───▶ OutputMuxer
//! │ (state machine)  │    │ (capture target) │
//! └──────────────────┘    └──────────────────┘
//! ```

pub mod capture;
pub mod config;
pub mod encode;
pub mod error;
pub mod output;
pub mod record;
pub mod types;

pub use capture::FrameAccumulator;
pub use config::{ConfigFile, DecodeFailurePolicy, RecordingConfig, TimelapseConfig, VideoQualityPreset};
pub use encode::{EncodeReport, OfflineEncoder};
pub use error::{Result, ShutterError};
pub use record::{CaptureTarget, FfmpegRecorderBackend, RecordState, RecordingSession};
pub use types::{Frame, FrameFormat, PixelFormat, RawFrame};
