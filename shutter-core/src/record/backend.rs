//! Platform recorder interface
//!
//! A [`RecorderBackend`] allocates one [`Recorder`] per session. The recorder
//! owns the encoder and output file; the camera pipeline pushes frames into
//! its [`CaptureTarget`].

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::VideoQualityPreset;
use crate::error::Result;
use crate::types::Frame;

/// Everything a backend needs to allocate a recorder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderSettings {
    /// Output resolution, framerate and bitrate
    pub quality: VideoQualityPreset,
    /// Record an audio track
    pub audio_enabled: bool,
    /// File the recording is written to
    pub output_path: PathBuf,
    /// Force a specific FFmpeg encoder
    pub encoder: Option<String>,
}

/// Input surface the camera pipeline renders into
///
/// Cloning is cheap; all clones feed the same recorder.
#[derive(Debug, Clone)]
pub struct CaptureTarget {
    tx: SyncSender<Frame>,
    width: u32,
    height: u32,
    dropped: Arc<AtomicU64>,
}

impl CaptureTarget {
    /// Create a target of the given size and the receiving end for the recorder
    pub fn channel(width: u32, height: u32, capacity: usize) -> (Self, Receiver<Frame>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        let target = Self {
            tx,
            width,
            height,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (target, rx)
    }

    /// Size the recorder encodes at; frames of other sizes are scaled
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Push a frame without blocking
    ///
    /// Returns false if the frame was dropped because the recorder is busy
    /// or gone.
    pub fn submit(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Frames dropped by [`submit`](Self::submit)
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Frame counters of a running recorder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    /// Frames handed to the encoder
    pub frames_encoded: u64,
    /// Frames discarded before start, while paused, or after a failure
    pub frames_dropped: u64,
}

/// One allocated recorder
pub trait Recorder: Send {
    /// Surface frames are pushed into
    fn capture_target(&self) -> CaptureTarget;

    /// Begin encoding frames
    fn start(&mut self) -> Result<()>;

    /// Stop encoding frames without finalizing the file
    fn pause(&mut self) -> Result<()>;

    /// Continue after [`pause`](Self::pause)
    fn resume(&mut self) -> Result<()>;

    /// Whether pause/resume are available
    fn supports_pause(&self) -> bool {
        true
    }

    /// Frame counters so far
    fn stats(&self) -> RecorderStats {
        RecorderStats::default()
    }

    /// Finalize the output file
    fn stop(&mut self) -> Result<()>;

    /// Free all resources. Must be safe to call more than once.
    fn release(&mut self);
}

/// Allocates recorders
pub trait RecorderBackend: Send + Sync {
    /// Allocate and configure a recorder
    ///
    /// Fails with [`ShutterError::ResourceUnavailable`](crate::ShutterError::ResourceUnavailable)
    /// if the settings cannot be satisfied.
    fn open(&self, settings: &RecorderSettings) -> Result<Box<dyn Recorder>>;
}
