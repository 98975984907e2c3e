//! FFmpeg-backed live recorder
//!
//! Each recorder runs one encode thread that owns the H.264 encoder and the
//! MP4 container. Frames pushed into the capture target are scaled to the
//! preset resolution, timestamped by their position in the recording and
//! encoded. Frames that arrive before start or while paused are dropped.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::backend::{CaptureTarget, Recorder, RecorderBackend, RecorderSettings, RecorderStats};
use crate::config::DEQUEUE_TIMEOUT;
use crate::encode::{Drain, EncoderSettings, FfmpegEncoder, FrameScaler, HardwareEncoder};
use crate::error::{Result, ShutterError};
use crate::output::muxer::OutputMuxer;
use crate::output::Mp4Container;
use crate::types::{ContainerFormat, Frame, OutputDescriptor, SampleFlags};

/// Frames buffered between the camera pipeline and the encode thread
const FRAME_QUEUE: usize = 8;

/// How long the encode thread waits for a frame before checking for commands
const FRAME_POLL: Duration = Duration::from_millis(20);

/// How long the encoder may go without accepting input or producing output
const ENCODER_STALL: Duration = Duration::from_secs(5);

/// Commands for the encode thread
enum Control {
    Start,
    Pause,
    Resume,
    Stop(Sender<Result<()>>),
}

/// Allocates [`FfmpegRecorder`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegRecorderBackend;

impl RecorderBackend for FfmpegRecorderBackend {
    fn open(&self, settings: &RecorderSettings) -> Result<Box<dyn Recorder>> {
        Ok(Box::new(FfmpegRecorder::open(settings)?))
    }
}

/// Live recorder writing H.264 in MP4
pub struct FfmpegRecorder {
    target: CaptureTarget,
    control: Option<Sender<Control>>,
    worker: Option<JoinHandle<()>>,
    stats: Arc<Mutex<RecorderStats>>,
    path: PathBuf,
}

impl FfmpegRecorder {
    /// Open the encoder and output file on a new encode thread
    pub fn open(settings: &RecorderSettings) -> Result<Self> {
        if settings.audio_enabled {
            warn!("Audio capture is not available; recording video only");
        }

        let (width, height) = settings.quality.resolution();
        let (target, frames) = CaptureTarget::channel(width, height, FRAME_QUEUE);
        let (control_tx, control_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let thread_settings = settings.clone();
        let stats = Arc::new(Mutex::new(RecorderStats::default()));
        let thread_stats = Arc::clone(&stats);

        let worker = std::thread::Builder::new()
            .name("shutter-recorder".into())
            .spawn(move || {
                let pipeline = match RecordPipeline::open(&thread_settings, thread_stats) {
                    Ok(pipeline) => {
                        let _ = ready_tx.send(Ok(()));
                        pipeline
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                pipeline.run(frames, control_rx);
            })
            .map_err(|e| {
                ShutterError::unavailable(format!("Failed to spawn recorder thread: {}", e))
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                target,
                control: Some(control_tx),
                worker: Some(worker),
                stats,
                path: settings.output_path.clone(),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(ShutterError::unavailable("recorder thread exited during setup"))
            }
        }
    }

    fn send(&self, control: Control) -> Result<()> {
        self.control
            .as_ref()
            .ok_or_else(|| ShutterError::codec("recorder already released"))?
            .send(control)
            .map_err(|_| ShutterError::codec("recorder thread is gone"))
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Recorder thread panicked");
            }
        }
    }
}

impl Recorder for FfmpegRecorder {
    fn capture_target(&self) -> CaptureTarget {
        self.target.clone()
    }

    fn start(&mut self) -> Result<()> {
        self.send(Control::Start)
    }

    fn pause(&mut self) -> Result<()> {
        self.send(Control::Pause)
    }

    fn resume(&mut self) -> Result<()> {
        self.send(Control::Resume)
    }

    fn stats(&self) -> RecorderStats {
        *self.stats.lock()
    }

    fn stop(&mut self) -> Result<()> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(Control::Stop(reply_tx))?;

        let result = reply_rx
            .recv()
            .map_err(|_| ShutterError::codec("recorder thread exited before finalizing"))?;

        self.control = None;
        self.join_worker();
        result
    }

    fn release(&mut self) {
        // Dropping the control channel tells the thread to discard its output
        if self.control.take().is_some() {
            debug!("Releasing recorder for {:?}", self.path);
        }
        self.join_worker();
    }
}

impl Drop for FfmpegRecorder {
    fn drop(&mut self) {
        self.release();
    }
}

/// Encoder, muxer and scaler owned by the encode thread
struct RecordPipeline {
    encoder: FfmpegEncoder,
    muxer: OutputMuxer<Mp4Container>,
    drain: Drain,
    scaler: Option<FrameScaler>,
    width: u32,
    height: u32,
    frame_duration_us: i64,
    frames_encoded: u64,
    frames_dropped: u64,
    stats: Arc<Mutex<RecorderStats>>,
    failure: Option<ShutterError>,
}

impl RecordPipeline {
    fn open(settings: &RecorderSettings, stats: Arc<Mutex<RecorderStats>>) -> Result<Self> {
        let encoder_settings =
            EncoderSettings::from_preset(settings.quality, settings.encoder.clone());
        let mut encoder = FfmpegEncoder::new(&encoder_settings)?;

        let container = Mp4Container::create(&settings.output_path, ContainerFormat::Mp4)
            .map_err(|e| ShutterError::unavailable(format!("Cannot create output file: {}", e)))?;
        let muxer = OutputMuxer::new(
            container,
            OutputDescriptor::new(&settings.output_path, ContainerFormat::Mp4),
        );

        encoder.start()?;

        Ok(Self {
            encoder,
            muxer,
            drain: Drain::new(),
            scaler: None,
            width: encoder_settings.width,
            height: encoder_settings.height,
            frame_duration_us: 1_000_000 / encoder_settings.fps.max(1) as i64,
            frames_encoded: 0,
            frames_dropped: 0,
            stats,
            failure: None,
        })
    }

    fn run(mut self, frames: Receiver<Frame>, control: Receiver<Control>) {
        let mut recording = false;

        loop {
            loop {
                match control.try_recv() {
                    Ok(Control::Start) | Ok(Control::Resume) => recording = true,
                    Ok(Control::Pause) => recording = false,
                    Ok(Control::Stop(reply)) => {
                        let _ = reply.send(self.finish());
                        return;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.abandon();
                        return;
                    }
                }
            }

            match frames.recv_timeout(FRAME_POLL) {
                Ok(frame) if recording && self.failure.is_none() => {
                    if let Err(e) = self.encode_frame(&frame) {
                        error!("Recording failed at frame {}: {}", self.frames_encoded, e);
                        self.failure = Some(e);
                    }
                }
                Ok(_) => self.frames_dropped += 1,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(FRAME_POLL);
                    continue;
                }
            }

            *self.stats.lock() = RecorderStats {
                frames_encoded: self.frames_encoded,
                frames_dropped: self.frames_dropped,
            };
        }
    }

    fn encode_frame(&mut self, frame: &Frame) -> Result<()> {
        let scaler = match self.scaler.take() {
            Some(scaler) if scaler.accepts(&frame.format) => scaler,
            _ => FrameScaler::new(frame.format, self.width, self.height)?,
        };
        let scaler = self.scaler.insert(scaler);
        let yuv = scaler.scale_to_i420(frame)?;

        let pts = self.frames_encoded as i64 * self.frame_duration_us;
        let slot = self.acquire_input()?;
        self.encoder
            .queue_input_buffer(slot, &yuv, pts, SampleFlags::NONE)?;
        self.frames_encoded += 1;

        // Take what is ready without blocking the next frame
        self.drain
            .tick(&mut self.encoder, &mut self.muxer, Duration::ZERO)?;
        Ok(())
    }

    fn acquire_input(&mut self) -> Result<usize> {
        let deadline = Instant::now() + ENCODER_STALL;
        loop {
            if let Some(slot) = self.encoder.dequeue_input_buffer(DEQUEUE_TIMEOUT)? {
                return Ok(slot);
            }
            if Instant::now() >= deadline {
                return Err(ShutterError::EncoderStalled(ENCODER_STALL));
            }
            self.drain
                .tick(&mut self.encoder, &mut self.muxer, DEQUEUE_TIMEOUT)?;
        }
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(e) = self.failure.take() {
            return Err(e);
        }

        let slot = self.acquire_input()?;
        let eos_pts = self.frames_encoded as i64 * self.frame_duration_us;
        self.encoder
            .queue_input_buffer(slot, &[], eos_pts, SampleFlags::END_OF_STREAM)?;
        self.drain.expect_end_of_stream();

        let deadline = Instant::now() + ENCODER_STALL;
        while !self.drain.is_done() {
            if Instant::now() >= deadline {
                return Err(ShutterError::EncoderStalled(ENCODER_STALL));
            }
            self.drain
                .tick(&mut self.encoder, &mut self.muxer, DEQUEUE_TIMEOUT)?;
        }
        Ok(())
    }

    /// Drain the encoder and finalize the file
    fn finish(&mut self) -> Result<()> {
        let flushed = self.flush();

        let encoder_stopped = self.encoder.stop();
        self.encoder.release();
        let muxer_stopped = self.muxer.stop();
        self.muxer.release();

        if let Err(e) = encoder_stopped {
            warn!("Encoder stop failed: {}", e);
        }
        flushed?;
        muxer_stopped?;

        info!(
            "Recording finalized: {:?} ({} frames, {} dropped)",
            self.muxer.descriptor().file_path,
            self.frames_encoded,
            self.frames_dropped
        );
        Ok(())
    }

    /// Release everything without finalizing
    fn abandon(&mut self) {
        self.encoder.release();
        self.muxer.release();

        if !self.muxer.is_started() {
            let path = &self.muxer.descriptor().file_path;
            if let Err(e) = std::fs::remove_file(path) {
                debug!("Could not remove unused output {:?}: {}", path, e);
            }
        } else {
            warn!(
                "Recorder released without stop; {:?} was not finalized",
                self.muxer.descriptor().file_path
            );
        }
    }
}
