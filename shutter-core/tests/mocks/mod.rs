//! Mock infrastructure for testing
//!
//! Provides scripted encoders, container writers and recorder backends that
//! log every call into a shared journal, plus generators for test stills.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use shutter_core::encode::{poll_with_timeout, HardwareEncoder, OutputEvent};
use shutter_core::output::ContainerWriter;
use shutter_core::record::{CaptureTarget, Recorder, RecorderBackend, RecorderSettings};
use shutter_core::types::{EncodedSample, Frame, SampleFlags, TrackFormat, MIME_AVC};
use shutter_core::{Result, ShutterError};

/// Ordered log of calls made on the mocks
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == entry).count()
    }

    /// Position of the first occurrence of `entry`
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }
}

/// Encode a solid-color image
pub fn solid_image(width: u32, height: u32, color: [u8; 3], format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).expect("encode test image");
    out.into_inner()
}

/// A solid-color JPEG still
pub fn solid_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    solid_image(width, height, color, ImageFormat::Jpeg)
}

/// A diagonal gradient JPEG still
pub fn gradient_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        let r = ((x as f32 / width as f32) * 255.0) as u8;
        let g = ((y as f32 / height as f32) * 255.0) as u8;
        let b = (((x + y) as f32 / (width + height) as f32) * 255.0) as u8;
        Rgb([r, g, b])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Jpeg)
        .expect("encode test image");
    out.into_inner()
}

/// Behavior switches for [`MockEncoder`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MockEncoderOptions {
    /// Emit a sample before reporting the output format
    pub data_before_format: bool,
    /// Emit an SPS/PPS buffer flagged as codec config after the format
    pub emit_codec_config: bool,
    /// Never hand out input slots or produce output; each poll waits out its timeout
    pub stall: bool,
}

/// Encoder that echoes each input frame back as one sample with the same timestamp
pub struct MockEncoder {
    options: MockEncoderOptions,
    journal: Journal,
    format_sent: bool,
    outputs: VecDeque<EncodedSample>,
    next_slot: usize,
    next_output: usize,
    width: u32,
    height: u32,
    polls: Arc<Mutex<Vec<Duration>>>,
}

impl MockEncoder {
    pub fn new(journal: Journal) -> Self {
        Self::with_options(journal, MockEncoderOptions::default())
    }

    pub fn with_options(journal: Journal, options: MockEncoderOptions) -> Self {
        Self {
            options,
            journal,
            format_sent: false,
            outputs: VecDeque::new(),
            next_slot: 0,
            next_output: 0,
            width: 320,
            height: 180,
            polls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Timeouts passed to every dequeue call, shared with the encoder
    pub fn poll_timeouts(&self) -> Arc<Mutex<Vec<Duration>>> {
        Arc::clone(&self.polls)
    }

    fn format(&self) -> TrackFormat {
        TrackFormat {
            mime: MIME_AVC.to_string(),
            width: self.width,
            height: self.height,
            fps: 30,
            bitrate_bps: 10_000_000,
            extradata: vec![0x01, 0x64, 0x00, 0x28],
        }
    }
}

impl HardwareEncoder for MockEncoder {
    fn start(&mut self) -> Result<()> {
        self.journal.push("encoder.start");
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>> {
        self.polls.lock().push(timeout);
        if self.options.stall {
            return poll_with_timeout(timeout, || Ok(None));
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        Ok(Some(slot))
    }

    fn queue_input_buffer(
        &mut self,
        _slot: usize,
        data: &[u8],
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> Result<()> {
        if flags.end_of_stream {
            self.journal.push("encoder.eos");
            self.outputs
                .push_back(EncodedSample::end_of_stream(presentation_time_us));
            return Ok(());
        }

        self.journal.push(format!("encoder.queue {}", presentation_time_us));
        let payload: Vec<u8> = data.iter().take(32).copied().collect();
        let flags = if presentation_time_us == 0 {
            SampleFlags::KEY_FRAME
        } else {
            SampleFlags::NONE
        };
        self.outputs
            .push_back(EncodedSample::new(payload, presentation_time_us, flags));
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<OutputEvent> {
        self.polls.lock().push(timeout);
        if self.options.stall {
            if !self.format_sent {
                self.format_sent = true;
                return Ok(OutputEvent::FormatChanged(self.format()));
            }
            poll_with_timeout::<()>(timeout, || Ok(None))?;
            return Ok(OutputEvent::TryAgainLater);
        }

        if !self.format_sent && !(self.options.data_before_format && !self.outputs.is_empty()) {
            self.format_sent = true;
            if self.options.emit_codec_config {
                self.outputs.push_front(EncodedSample::new(
                    vec![0, 0, 0, 1, 0x67, 0x64],
                    0,
                    SampleFlags::CODEC_CONFIG,
                ));
            }
            return Ok(OutputEvent::FormatChanged(self.format()));
        }

        match self.outputs.pop_front() {
            Some(sample) => {
                let index = self.next_output;
                self.next_output += 1;
                Ok(OutputEvent::Sample { index, sample })
            }
            None => Ok(OutputEvent::TryAgainLater),
        }
    }

    fn release_output_buffer(&mut self, _index: usize) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.journal.push("encoder.stop");
        Ok(())
    }

    fn release(&mut self) {
        self.journal.push("encoder.release");
    }
}

/// Container writer that appends payloads to a plain file
pub struct MockContainer {
    path: PathBuf,
    file: Option<std::fs::File>,
    journal: Journal,
    pts: Arc<Mutex<Vec<i64>>>,
}

impl MockContainer {
    pub fn create(path: impl Into<PathBuf>, journal: Journal) -> Self {
        let path = path.into();
        let file = std::fs::File::create(&path).expect("create mock output");
        Self {
            path,
            file: Some(file),
            journal,
            pts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Timestamps of written samples, shared with the writer
    pub fn timestamps(&self) -> Arc<Mutex<Vec<i64>>> {
        Arc::clone(&self.pts)
    }
}

impl ContainerWriter for MockContainer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize> {
        self.journal.push(format!("muxer.add_track {}", format.mime));
        Ok(0)
    }

    fn start(&mut self) -> Result<()> {
        self.journal.push("muxer.start");
        Ok(())
    }

    fn write_sample(&mut self, _track_index: usize, sample: &EncodedSample) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| ShutterError::muxer("mock container released"))?;
        file.write_all(sample.payload())?;
        self.pts.lock().push(sample.presentation_time_us);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.journal.push("muxer.stop");
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }

    fn release(&mut self) {
        self.journal.push("muxer.release");
        self.file = None;
    }
}

/// Behavior switches for [`MockRecorderBackend`]
#[derive(Debug, Clone, Copy)]
pub struct MockRecorderOptions {
    pub fail_open: bool,
    pub fail_stop: bool,
    pub supports_pause: bool,
}

impl Default for MockRecorderOptions {
    fn default() -> Self {
        Self {
            fail_open: false,
            fail_stop: false,
            supports_pause: true,
        }
    }
}

/// Backend that hands out [`MockRecorder`]s
#[derive(Clone, Default)]
pub struct MockRecorderBackend {
    pub options: MockRecorderOptions,
    pub journal: Journal,
    pub opened: Arc<Mutex<Vec<RecorderSettings>>>,
}

impl MockRecorderBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: MockRecorderOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }
}

impl RecorderBackend for MockRecorderBackend {
    fn open(&self, settings: &RecorderSettings) -> Result<Box<dyn Recorder>> {
        if self.options.fail_open {
            self.journal.push("recorder.open_failed");
            return Err(ShutterError::unavailable(format!(
                "{} not supported by mock",
                settings.quality
            )));
        }

        self.journal.push(format!("recorder.open {}", settings.quality));
        self.opened.lock().push(settings.clone());

        let (width, height) = settings.quality.resolution();
        let (target, frames) = CaptureTarget::channel(width, height, 4);
        Ok(Box::new(MockRecorder {
            options: self.options,
            journal: self.journal.clone(),
            target,
            _frames: frames,
            path: settings.output_path.clone(),
        }))
    }
}

/// Recorder that journals its calls and writes a placeholder file on stop
pub struct MockRecorder {
    options: MockRecorderOptions,
    journal: Journal,
    target: CaptureTarget,
    _frames: Receiver<Frame>,
    path: PathBuf,
}

impl Recorder for MockRecorder {
    fn capture_target(&self) -> CaptureTarget {
        self.target.clone()
    }

    fn start(&mut self) -> Result<()> {
        self.journal.push("recorder.start");
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.journal.push("recorder.pause");
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.journal.push("recorder.resume");
        Ok(())
    }

    fn supports_pause(&self) -> bool {
        self.options.supports_pause
    }

    fn stop(&mut self) -> Result<()> {
        self.journal.push("recorder.stop");
        if self.options.fail_stop {
            return Err(ShutterError::codec("mock stop failure"));
        }
        std::fs::write(&self.path, b"mock recording")?;
        Ok(())
    }

    fn release(&mut self) {
        self.journal.push("recorder.release");
    }
}
