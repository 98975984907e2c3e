//! Output muxer integration
//!
//! [`OutputMuxer`] sits between the encoder drain loop and a
//! [`ContainerWriter`] and enforces the negotiation order: exactly one track,
//! added and started from the encoder's format-changed signal, before any
//! sample is written. Violations are [`ShutterError::FormatNegotiation`].

use tracing::{debug, info, trace, warn};

use crate::error::{Result, ShutterError};
use crate::types::{EncodedSample, OutputDescriptor, TrackFormat};

/// A container file writer (MP4 muxer)
pub trait ContainerWriter {
    /// Register a track and return its index
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize>;

    /// Write the container header; no more tracks may be added afterwards
    fn start(&mut self) -> Result<()>;

    /// Append one encoded sample to a track
    fn write_sample(&mut self, track_index: usize, sample: &EncodedSample) -> Result<()>;

    /// Finalize the file (write the trailer/index)
    fn stop(&mut self) -> Result<()>;

    /// Free native resources. Must be safe to call more than once.
    fn release(&mut self);
}

impl<W: ContainerWriter + ?Sized> ContainerWriter for Box<W> {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize> {
        (**self).add_track(format)
    }

    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn write_sample(&mut self, track_index: usize, sample: &EncodedSample) -> Result<()> {
        (**self).write_sample(track_index, sample)
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Single-video-track muxer with negotiation checks
pub struct OutputMuxer<W: ContainerWriter> {
    /// Underlying container writer
    writer: W,
    /// Output path, container and negotiated track
    descriptor: OutputDescriptor,
    /// Header written
    started: bool,
    /// Trailer written
    stopped: bool,
    /// Timestamp of the last written sample
    last_pts: Option<i64>,
    /// Samples written
    samples_written: u64,
    /// Payload bytes written
    bytes_written: u64,
}

impl<W: ContainerWriter> OutputMuxer<W> {
    /// Wrap a container writer
    pub fn new(writer: W, descriptor: OutputDescriptor) -> Self {
        Self {
            writer,
            descriptor,
            started: false,
            stopped: false,
            last_pts: None,
            samples_written: 0,
            bytes_written: 0,
        }
    }

    /// Add the single video track from the encoder's output format
    pub fn add_track(&mut self, format: &TrackFormat) -> Result<usize> {
        if let Some(existing) = self.descriptor.track_index {
            return Err(ShutterError::negotiation(format!(
                "track already added (index {}), encoder reported its format twice",
                existing
            )));
        }
        if self.started {
            return Err(ShutterError::negotiation("cannot add a track after start"));
        }

        let index = self.writer.add_track(format)?;
        self.descriptor.track_index = Some(index);
        debug!(
            "Muxer track {} added: {} {}x{} @ {}fps, {} bytes codec data",
            index,
            format.mime,
            format.width,
            format.height,
            format.fps,
            format.extradata.len()
        );
        Ok(index)
    }

    /// Write the container header
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(ShutterError::negotiation("muxer started twice"));
        }
        if self.descriptor.track_index.is_none() {
            return Err(ShutterError::negotiation(
                "muxer started before the encoder reported its output format",
            ));
        }

        self.writer.start()?;
        self.started = true;
        info!("Muxer started: {:?}", self.descriptor.file_path);
        Ok(())
    }

    /// Write one sample to the negotiated track
    pub fn write_sample_data(&mut self, track_index: usize, sample: &EncodedSample) -> Result<()> {
        if !self.started {
            return Err(ShutterError::negotiation(
                "sample written before the muxer was started from the encoder's format",
            ));
        }
        if self.stopped {
            return Err(ShutterError::negotiation("sample written after the muxer was stopped"));
        }
        if self.descriptor.track_index != Some(track_index) {
            return Err(ShutterError::negotiation(format!(
                "sample written to unknown track {}",
                track_index
            )));
        }
        if let Some(last) = self.last_pts {
            if sample.presentation_time_us <= last {
                return Err(ShutterError::muxer(format!(
                    "presentation timestamp {} is not after {}",
                    sample.presentation_time_us, last
                )));
            }
        }

        self.writer.write_sample(track_index, sample)?;
        self.last_pts = Some(sample.presentation_time_us);
        self.samples_written += 1;
        self.bytes_written += sample.size as u64;

        trace!(
            "Muxed sample: pts={}us, size={}, key={}",
            sample.presentation_time_us,
            sample.size,
            sample.flags.key_frame
        );
        Ok(())
    }

    /// Finalize the file. A muxer that never started has nothing to finalize.
    pub fn stop(&mut self) -> Result<()> {
        if !self.started {
            warn!("Stopping muxer that was never started; no file header was written");
            return Ok(());
        }
        if self.stopped {
            return Ok(());
        }

        self.stopped = true;
        self.writer.stop()?;
        info!(
            "Muxer finalized {:?} ({} samples, {} bytes)",
            self.descriptor.file_path, self.samples_written, self.bytes_written
        );
        Ok(())
    }

    /// Free the writer
    pub fn release(&mut self) {
        self.writer.release();
    }

    /// Output path, container and track
    pub fn descriptor(&self) -> &OutputDescriptor {
        &self.descriptor
    }

    /// Whether the header has been written
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Number of samples written
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Borrow the underlying writer
    pub fn writer(&self) -> &W {
        &self.writer
    }
}
