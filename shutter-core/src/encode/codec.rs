//! Buffer-slot encoder interface
//!
//! Hardware encoders expose a queue of input slots and a queue of output
//! buffers. Callers acquire an input slot, fill it with one raw frame and a
//! presentation timestamp, then poll the output side until it reports that
//! nothing is ready.

use std::thread;
use std::time::{Duration, Instant};

use crate::config::{TimelapseConfig, VideoQualityPreset, I_FRAME_INTERVAL_SECS};
use crate::error::Result;
use crate::types::{EncodedSample, SampleFlags, TrackFormat};

/// Result of polling the encoder's output side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// The encoder now knows its output parameters. Reported once, before any sample.
    FormatChanged(TrackFormat),
    /// An output buffer holds an encoded sample; release it with its index when done
    Sample {
        /// Output buffer index
        index: usize,
        /// The encoded sample
        sample: EncodedSample,
    },
    /// Nothing became ready within the poll timeout
    TryAgainLater,
}

/// An H.264 encoder driven through input and output buffer queues
pub trait HardwareEncoder {
    /// Begin accepting input
    fn start(&mut self) -> Result<()>;

    /// Acquire a free input slot, waiting at most `timeout`
    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>>;

    /// Submit one planar YUV420 frame (or an empty end-of-stream buffer) in `slot`
    fn queue_input_buffer(
        &mut self,
        slot: usize,
        data: &[u8],
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> Result<()>;

    /// Poll for the next output event, waiting at most `timeout`
    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<OutputEvent>;

    /// Hand an output buffer back to the encoder
    fn release_output_buffer(&mut self, index: usize) -> Result<()>;

    /// Stop encoding
    fn stop(&mut self) -> Result<()>;

    /// Free native resources. Must be safe to call more than once.
    fn release(&mut self);
}

impl<E: HardwareEncoder + ?Sized> HardwareEncoder for Box<E> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>> {
        (**self).dequeue_input_buffer(timeout)
    }

    fn queue_input_buffer(
        &mut self,
        slot: usize,
        data: &[u8],
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> Result<()> {
        (**self).queue_input_buffer(slot, data, presentation_time_us, flags)
    }

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<OutputEvent> {
        (**self).dequeue_output_buffer(timeout)
    }

    fn release_output_buffer(&mut self, index: usize) -> Result<()> {
        (**self).release_output_buffer(index)
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Sleep granularity while waiting on an encoder queue
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Retry `attempt` until it yields a value or `timeout` elapses
///
/// `attempt` always runs at least once, so a zero timeout is a single
/// non-blocking try. Errors end the wait immediately.
pub fn poll_with_timeout<T>(
    timeout: Duration,
    mut attempt: impl FnMut() -> Result<Option<T>>,
) -> Result<Option<T>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = attempt()? {
            return Ok(Some(value));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Parameters an encoder is configured with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Nominal framerate
    pub fps: u32,
    /// Target bitrate in bits per second
    pub bitrate_bps: u64,
    /// Seconds between key frames
    pub i_frame_interval_secs: u32,
    /// Force a specific FFmpeg encoder
    pub encoder: Option<String>,
}

impl EncoderSettings {
    /// Settings for a timelapse encode run
    pub fn from_timelapse(config: &TimelapseConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            fps: config.output_fps,
            bitrate_bps: config.bitrate_bps,
            i_frame_interval_secs: config.i_frame_interval_secs,
            encoder: config.encoder.clone(),
        }
    }

    /// Settings for a live recording at `preset`
    pub fn from_preset(preset: VideoQualityPreset, encoder: Option<String>) -> Self {
        Self {
            width: preset.width(),
            height: preset.height(),
            fps: preset.fps(),
            bitrate_bps: preset.bitrate_bps(),
            i_frame_interval_secs: I_FRAME_INTERVAL_SECS,
            encoder,
        }
    }

    /// Key frame distance in frames
    pub fn gop_size(&self) -> u32 {
        (self.fps * self.i_frame_interval_secs).max(1)
    }

    /// Size of one planar YUV420 input frame
    pub fn input_frame_size(&self) -> usize {
        crate::types::PixelFormat::Yuv420p.frame_size(self.width, self.height)
    }
}
