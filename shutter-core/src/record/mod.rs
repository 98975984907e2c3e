//! Live video recording
//!
//! [`RecordingSession`] owns the recording state machine and drives a
//! [`Recorder`] allocated by a [`RecorderBackend`]. The FFmpeg backend
//! encodes H.264 into MP4 on its own thread.

mod backend;
mod ffmpeg;
mod session;
mod state;

pub use backend::{CaptureTarget, Recorder, RecorderBackend, RecorderSettings, RecorderStats};
pub use ffmpeg::{FfmpegRecorder, FfmpegRecorderBackend};
pub use session::{MediaRegistrar, RecordingSession, DURATION_TICK};
pub use state::{RecordOp, RecordState, TransitionRejected};
