//! Offline timelapse encoding
//!
//! Turns a buffer of compressed stills into an H.264 MP4. Each still is
//! decoded, scaled to the output resolution, converted to I420 and fed to
//! the encoder with a timestamp derived from the number of frames actually
//! encoded, so skipped stills leave no gaps:
//!
//! ```text
//! pts(n) = n * (1_000_000 / output_fps)   // microseconds, integer division
//! ```
//!
//! The run always ends by submitting an end-of-stream buffer and draining
//! until the encoder confirms it. Encoder and muxer are stopped and released
//! on every exit path.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::imageops::FilterType;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::codec::{EncoderSettings, HardwareEncoder};
use super::drain::{Drain, DrainTick};
use super::ffmpeg::FfmpegEncoder;
use super::yuv;
use crate::config::{DecodeFailurePolicy, TimelapseConfig, DEQUEUE_TIMEOUT};
use crate::error::{Result, ResultExt, ShutterError};
use crate::output::muxer::{ContainerWriter, OutputMuxer};
use crate::output::Mp4Container;
use crate::types::{OutputDescriptor, RawFrame, SampleFlags};

/// Summary of a finished encode run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeReport {
    /// Written file
    pub path: PathBuf,
    /// Stills that made it into the video
    pub frames_encoded: u64,
    /// Stills dropped because they could not be decoded
    pub frames_skipped: u64,
    /// Samples written to the container
    pub samples_written: u64,
    /// Playback duration in microseconds
    pub duration_us: i64,
}

impl EncodeReport {
    /// Playback duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.duration_us as f64 / 1_000_000.0
    }
}

/// Progress of the current encode run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeProgress {
    /// Stills encoded so far
    pub encoded: u64,
    /// Stills skipped so far
    pub skipped: u64,
    /// Stills in the run
    pub total: usize,
}

impl EncodeProgress {
    /// Fraction of stills handled, 0.0 to 1.0
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.encoded + self.skipped) as f64 / self.total as f64
    }
}

/// Tracks time since the encoder last made progress
struct StallWatchdog {
    timeout: Option<Duration>,
    last_progress: Instant,
}

impl StallWatchdog {
    fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            last_progress: Instant::now(),
        }
    }

    fn progressed(&mut self) {
        self.last_progress = Instant::now();
    }

    fn check(&self) -> Result<()> {
        match self.timeout {
            Some(limit) if self.last_progress.elapsed() >= limit => {
                Err(ShutterError::EncoderStalled(limit))
            }
            _ => Ok(()),
        }
    }

    fn observe(&mut self, tick: DrainTick) -> Result<()> {
        match tick {
            DrainTick::Idle => self.check(),
            DrainTick::Progress | DrainTick::Finished => {
                self.progressed();
                Ok(())
            }
        }
    }
}

/// Clears the running flag when a run ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Encodes buffered stills into a video file
///
/// One instance runs one encode at a time, so its progress channel always
/// describes a single run. A second concurrent run fails with
/// [`ShutterError::ResourceUnavailable`].
pub struct OfflineEncoder {
    config: TimelapseConfig,
    progress: Arc<watch::Sender<EncodeProgress>>,
    running: Arc<AtomicBool>,
}

impl OfflineEncoder {
    /// Create an encoder for `config`
    pub fn new(config: TimelapseConfig) -> Self {
        let (progress, _) = watch::channel(EncodeProgress::default());
        Self {
            config,
            progress: Arc::new(progress),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Same channel and run flag, for moving the work to another thread
    fn share(&self) -> Self {
        Self {
            config: self.config.clone(),
            progress: Arc::clone(&self.progress),
            running: Arc::clone(&self.running),
        }
    }

    fn begin_run(&self) -> Result<RunGuard<'_>> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(ShutterError::unavailable(
                "an encode is already running on this encoder",
            ));
        }
        Ok(RunGuard(&self.running))
    }

    /// Encode settings
    pub fn config(&self) -> &TimelapseConfig {
        &self.config
    }

    /// Observe progress of runs on this instance
    pub fn subscribe_progress(&self) -> watch::Receiver<EncodeProgress> {
        self.progress.subscribe()
    }

    /// Encode `frames` to `path` using the system H.264 encoder and MP4 muxer
    pub fn encode_to_file(&self, frames: &[RawFrame], path: &Path) -> Result<EncodeReport> {
        self.check_input(frames)?;

        let encoder = FfmpegEncoder::new(&EncoderSettings::from_timelapse(&self.config))?;
        let container = match Mp4Container::create(path, self.config.container) {
            Ok(container) => container,
            Err(e) => {
                let mut encoder = encoder;
                encoder.release();
                return Err(e);
            }
        };

        self.encode_with(frames, encoder, container, path)
    }

    /// Encode `frames` on a blocking worker thread
    pub async fn encode_in_background(
        &self,
        frames: Vec<RawFrame>,
        path: PathBuf,
    ) -> Result<EncodeReport> {
        let worker = self.share();
        tokio::task::spawn_blocking(move || worker.encode_to_file(&frames, &path))
            .await
            .map_err(|e| ShutterError::codec(format!("Encode worker failed: {}", e)))?
    }

    /// Encode `frames` through the given encoder and container writer
    pub fn encode_with<E, W>(
        &self,
        frames: &[RawFrame],
        mut encoder: E,
        writer: W,
        path: &Path,
    ) -> Result<EncodeReport>
    where
        E: HardwareEncoder,
        W: ContainerWriter,
    {
        self.check_input(frames)?;
        let _run = match self.begin_run() {
            Ok(guard) => guard,
            Err(e) => {
                let mut writer = writer;
                encoder.release();
                writer.release();
                return Err(e);
            }
        };

        let mut muxer = OutputMuxer::new(writer, OutputDescriptor::new(path, self.config.container));
        let result = self.run(frames, &mut encoder, &mut muxer);

        // Encoder first, then muxer, on every exit path
        let encoder_stopped = encoder.stop();
        encoder.release();
        let muxer_stopped = muxer.stop();
        muxer.release();

        if let Err(e) = &encoder_stopped {
            warn!("Encoder stop failed: {}", e);
        }

        match result {
            Ok(report) => {
                muxer_stopped.context("Failed to finalize video file")?;
                if report.frames_encoded == 0 {
                    return Err(ShutterError::decode(format!(
                        "none of the {} buffered frames could be decoded",
                        frames.len()
                    )));
                }

                info!(
                    "Timelapse written: {:?} ({} frames, {} skipped, {:.2}s)",
                    report.path,
                    report.frames_encoded,
                    report.frames_skipped,
                    report.duration_secs()
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(stop_err) = muxer_stopped {
                    warn!("Muxer stop after failed encode: {}", stop_err);
                }
                error!("Timelapse encode failed: {}", e);
                Err(e)
            }
        }
    }

    fn check_input(&self, frames: &[RawFrame]) -> Result<()> {
        self.config.validate_strict().map_err(ShutterError::config)?;
        if frames.is_empty() {
            return Err(ShutterError::config("no frames to encode"));
        }
        Ok(())
    }

    fn run<E, W>(
        &self,
        frames: &[RawFrame],
        encoder: &mut E,
        muxer: &mut OutputMuxer<W>,
    ) -> Result<EncodeReport>
    where
        E: HardwareEncoder,
        W: ContainerWriter,
    {
        let total = frames.len();
        let mut progress = EncodeProgress {
            total,
            ..EncodeProgress::default()
        };
        self.progress.send_replace(progress);

        encoder.start()?;

        let mut drain = Drain::new();
        let mut watchdog = StallWatchdog::new(self.config.stall_timeout);

        for frame in frames {
            let yuv = match decode_still(frame, self.config.width, self.config.height) {
                Ok(yuv) => yuv,
                Err(e) => match self.config.decode_failure_policy {
                    DecodeFailurePolicy::Skip => {
                        warn!("Skipping frame {}: {}", frame.index, e);
                        progress.skipped += 1;
                        self.progress.send_replace(progress);
                        continue;
                    }
                    DecodeFailurePolicy::Abort => {
                        return Err(e.with_context(format!("frame {}", frame.index)));
                    }
                },
            };

            let pts = self.config.presentation_time_us(progress.encoded);
            let slot = acquire_input(encoder, muxer, &mut drain, &mut watchdog)?;
            encoder.queue_input_buffer(slot, &yuv, pts, SampleFlags::NONE)?;
            watchdog.progressed();
            progress.encoded += 1;

            let tick = drain.tick(encoder, muxer, DEQUEUE_TIMEOUT)?;
            watchdog.observe(tick)?;
            self.progress.send_replace(progress);
        }

        debug!(
            "All frames submitted ({} encoded, {} skipped), signalling end of stream",
            progress.encoded, progress.skipped
        );

        let slot = acquire_input(encoder, muxer, &mut drain, &mut watchdog)?;
        let eos_pts = self.config.presentation_time_us(progress.encoded);
        encoder.queue_input_buffer(slot, &[], eos_pts, SampleFlags::END_OF_STREAM)?;
        drain.expect_end_of_stream();

        while !drain.is_done() {
            let tick = drain.tick(encoder, muxer, DEQUEUE_TIMEOUT)?;
            watchdog.observe(tick)?;
        }

        Ok(EncodeReport {
            path: muxer.descriptor().file_path.clone(),
            frames_encoded: progress.encoded,
            frames_skipped: progress.skipped,
            samples_written: muxer.samples_written(),
            duration_us: self.config.presentation_time_us(progress.encoded),
        })
    }
}

/// Wait for a free input slot, draining output while the encoder is full
fn acquire_input<E, W>(
    encoder: &mut E,
    muxer: &mut OutputMuxer<W>,
    drain: &mut Drain,
    watchdog: &mut StallWatchdog,
) -> Result<usize>
where
    E: HardwareEncoder,
    W: ContainerWriter,
{
    loop {
        if let Some(slot) = encoder.dequeue_input_buffer(DEQUEUE_TIMEOUT)? {
            return Ok(slot);
        }
        if drain.is_done() {
            return Err(ShutterError::codec(
                "encoder ended the stream while input was still pending",
            ));
        }
        let tick = drain.tick(encoder, muxer, DEQUEUE_TIMEOUT)?;
        watchdog.observe(tick)?;
    }
}

/// Decode a compressed still and convert it to I420 at the output size
pub fn decode_still(frame: &RawFrame, width: u32, height: u32) -> Result<Vec<u8>> {
    if frame.is_empty() {
        return Err(ShutterError::decode("empty image buffer"));
    }

    let mut rgb = image::load_from_memory(&frame.bytes)?.to_rgb8();
    if rgb.dimensions() != (width, height) {
        rgb = image::imageops::resize(&rgb, width, height, FilterType::Triangle);
    }

    yuv::rgb_to_i420(rgb.as_raw(), width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    fn jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_still_scales_to_output() {
        let frame = RawFrame::new(0, jpeg(32, 16, [0, 0, 0]));
        let yuv = decode_still(&frame, 8, 4).unwrap();
        assert_eq!(yuv.len(), 8 * 4 + 2 * 4 * 2);
        // Black compresses losslessly enough to land near studio black
        assert!(yuv[..32].iter().all(|&y| (14..=20).contains(&y)));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let frame = RawFrame::new(3, vec![0x00, 0x01, 0x02]);
        let err = decode_still(&frame, 8, 4).unwrap_err();
        assert!(matches!(err, ShutterError::FrameDecode(_)));
    }

    #[test]
    fn test_progress_fraction() {
        let p = EncodeProgress {
            encoded: 3,
            skipped: 1,
            total: 8,
        };
        assert!((p.fraction() - 0.5).abs() < f64::EPSILON);
        assert_eq!(EncodeProgress::default().fraction(), 1.0);
    }

    #[test]
    fn test_stall_watchdog() {
        let mut dog = StallWatchdog::new(Some(Duration::ZERO));
        assert!(matches!(
            dog.observe(DrainTick::Idle),
            Err(ShutterError::EncoderStalled(_))
        ));
        assert!(dog.observe(DrainTick::Progress).is_ok());

        let mut patient = StallWatchdog::new(None);
        assert!(patient.observe(DrainTick::Idle).is_ok());
    }
}
