//! H.264 encoder via FFmpeg
//!
//! Prefers hardware encoders (NVENC, V4L2 M2M) and falls back to software
//! x264/OpenH264. FFmpeg's send/receive API is exposed through the
//! buffer-slot [`HardwareEncoder`] interface: input slots come from a small
//! fixed pool and every received packet becomes one output buffer.

use std::collections::VecDeque;
use std::time::Duration;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec::{self, encoder};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::util::frame::video::Video;
use ffmpeg_next::{Dictionary, Rational};
use tracing::{debug, info, trace, warn};

use super::codec::{poll_with_timeout, EncoderSettings, HardwareEncoder, OutputEvent};
use super::yuv;
use crate::error::{Result, ShutterError};
use crate::types::{EncodedSample, SampleFlags, TrackFormat, MIME_AVC};

/// H.264 encoders in order of preference
pub const H264_ENCODERS: [&str; 4] = ["h264_nvenc", "h264_v4l2m2m", "libx264", "libopenh264"];

/// Number of input slots handed out at once
const INPUT_SLOTS: usize = 8;

/// Encoder time base; timestamps are microseconds end to end
const MICROS: Rational = Rational(1, 1_000_000);

/// FFmpeg-backed H.264 encoder
pub struct FfmpegEncoder {
    /// Opened encoder, `None` once released
    encoder: Option<encoder::video::Encoder>,
    /// Name of the FFmpeg encoder in use
    name: &'static str,
    /// Settings the encoder was opened with
    settings: EncoderSettings,
    /// Output packet buffer
    packet: ffmpeg::Packet,
    /// Free input slots
    free_slots: VecDeque<usize>,
    /// Frame the encoder refused with EAGAIN, retried before the next receive
    pending: Option<(usize, Video)>,
    /// Output buffers handed out and not yet released
    outstanding: VecDeque<usize>,
    /// Next output buffer index
    next_output: usize,
    /// Whether the output format has been reported
    format_reported: bool,
    /// Whether end of stream has been signalled
    eos_sent: bool,
    /// Whether the end-of-stream buffer has been delivered
    eos_delivered: bool,
    /// Whether `start` has been called
    started: bool,
    /// Frames submitted
    frames_in: u64,
    /// Packets produced
    packets_out: u64,
}

impl FfmpegEncoder {
    /// Open an H.264 encoder for `settings`
    ///
    /// Fails with [`ShutterError::ResourceUnavailable`] when no H.264 encoder
    /// exists or none accepts the requested configuration.
    pub fn new(settings: &EncoderSettings) -> Result<Self> {
        ffmpeg::init().map_err(|e| ShutterError::unavailable(format!("FFmpeg init failed: {}", e)))?;

        let (name, codec) = select_h264_encoder(settings.encoder.as_deref())?;
        info!("Initializing encoder: {}", name);

        let mut encoder = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| {
                ShutterError::unavailable(format!("Failed to create encoder context: {}", e))
            })?;

        let bitrate = settings.bitrate_bps as usize;

        encoder.set_width(settings.width);
        encoder.set_height(settings.height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(MICROS);
        encoder.set_frame_rate(Some(Rational::new(settings.fps as i32, 1)));
        encoder.set_bit_rate(bitrate);
        encoder.set_max_bit_rate(bitrate * 2);
        encoder.set_gop(settings.gop_size());
        encoder.set_max_b_frames(0);
        // MP4 wants SPS/PPS in extradata rather than in-band
        encoder.set_flags(codec::Flags::GLOBAL_HEADER);

        let mut opts = Dictionary::new();
        match name {
            "h264_nvenc" => {
                opts.set("preset", "p4");
                opts.set("rc", "vbr");
                opts.set("profile", "high");
            }
            "libx264" => {
                opts.set("preset", "veryfast");
                opts.set("profile", "high");
            }
            _ => {}
        }

        let encoder = encoder
            .open_with(opts)
            .map_err(|e| ShutterError::unavailable(format!("Failed to open {}: {}", name, e)))?;

        info!(
            "Encoder opened: {} {}x{} @ {}fps, {} kbps, gop {}",
            name,
            settings.width,
            settings.height,
            settings.fps,
            settings.bitrate_bps / 1000,
            settings.gop_size()
        );

        Ok(Self {
            encoder: Some(encoder),
            name,
            settings: settings.clone(),
            packet: ffmpeg::Packet::empty(),
            free_slots: (0..INPUT_SLOTS).collect(),
            pending: None,
            outstanding: VecDeque::new(),
            next_output: 0,
            format_reported: false,
            eos_sent: false,
            eos_delivered: false,
            started: false,
            frames_in: 0,
            packets_out: 0,
        })
    }

    /// Name of the FFmpeg encoder in use
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn encoder_mut(&mut self) -> Result<&mut encoder::video::Encoder> {
        self.encoder
            .as_mut()
            .ok_or_else(|| ShutterError::codec("encoder already released"))
    }

    /// Stream parameters, including SPS/PPS once the encoder is open
    fn track_format(&self) -> Result<TrackFormat> {
        let encoder = self
            .encoder
            .as_ref()
            .ok_or_else(|| ShutterError::codec("encoder already released"))?;

        // SAFETY: the codec context is open and owned by `encoder`; extradata
        // is either null or points at `extradata_size` bytes owned by it.
        let extradata = unsafe {
            let ctx = encoder.as_ptr();
            let data = (*ctx).extradata;
            let size = (*ctx).extradata_size;
            if data.is_null() || size <= 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts(data, size as usize).to_vec()
            }
        };

        if extradata.is_empty() {
            warn!("Encoder {} produced no global header", self.name);
        }

        Ok(TrackFormat {
            mime: MIME_AVC.to_string(),
            width: self.settings.width,
            height: self.settings.height,
            fps: self.settings.fps,
            bitrate_bps: self.settings.bitrate_bps,
            extradata,
        })
    }

    /// Copy a contiguous I420 buffer into an FFmpeg frame, honoring line strides
    fn fill_frame(&self, data: &[u8], presentation_time_us: i64) -> Result<Video> {
        let (width, height) = (self.settings.width, self.settings.height);
        let planes = yuv::split_planes(data, width, height).ok_or_else(|| {
            ShutterError::codec(format!(
                "input buffer holds {} bytes, {}x{} YUV420 needs {}",
                data.len(),
                width,
                height,
                self.settings.input_frame_size()
            ))
        })?;

        let mut frame = Video::new(Pixel::YUV420P, width, height);
        let chroma_width = width.div_ceil(2) as usize;
        let chroma_height = height.div_ceil(2) as usize;

        for (plane, src, row_len, rows) in [
            (0, planes.y, width as usize, height as usize),
            (1, planes.u, chroma_width, chroma_height),
            (2, planes.v, chroma_width, chroma_height),
        ] {
            let stride = frame.stride(plane);
            let dst = frame.data_mut(plane);
            for row in 0..rows {
                dst[row * stride..row * stride + row_len]
                    .copy_from_slice(&src[row * row_len..(row + 1) * row_len]);
            }
        }

        frame.set_pts(Some(presentation_time_us));
        Ok(frame)
    }

    /// Retry a frame the encoder refused earlier. Returns true once nothing is pending.
    fn flush_pending(&mut self) -> Result<bool> {
        let Some((slot, frame)) = self.pending.take() else {
            return Ok(true);
        };

        match self.encoder_mut()?.send_frame(&frame) {
            Ok(()) => {
                self.free_slots.push_back(slot);
                self.frames_in += 1;
                Ok(true)
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                self.pending = Some((slot, frame));
                Ok(false)
            }
            Err(e) => {
                self.free_slots.push_back(slot);
                Err(ShutterError::codec(format!("Failed to send frame: {}", e)))
            }
        }
    }

    /// One receive attempt. `None` while the encoder has nothing ready.
    fn receive_sample(&mut self) -> Result<Option<EncodedSample>> {
        self.flush_pending()?;

        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| ShutterError::codec("encoder already released"))?;

        match encoder.receive_packet(&mut self.packet) {
            Ok(()) => {
                let pts = self.packet.pts().unwrap_or(0);
                let flags = SampleFlags {
                    key_frame: self.packet.is_key(),
                    ..SampleFlags::NONE
                };
                let data = self.packet.data().map(|d| d.to_vec()).unwrap_or_default();
                self.packets_out += 1;

                trace!(
                    "Encoded packet: pts={}, size={}, keyframe={}",
                    pts,
                    data.len(),
                    flags.key_frame
                );
                Ok(Some(EncodedSample::new(data, pts, flags)))
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(None),
            Err(ffmpeg::Error::Eof) => {
                self.eos_delivered = true;
                debug!("Encoder {} drained ({} packets)", self.name, self.packets_out);
                Ok(Some(EncodedSample::end_of_stream(0)))
            }
            Err(e) => Err(ShutterError::codec(format!("Failed to receive packet: {}", e))),
        }
    }
}

impl HardwareEncoder for FfmpegEncoder {
    fn start(&mut self) -> Result<()> {
        self.encoder_mut()?;
        self.started = true;
        debug!("Encoder {} started", self.name);
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>> {
        if !self.started {
            return Err(ShutterError::codec("input requested before the encoder was started"));
        }
        if self.eos_sent {
            return Ok(None);
        }
        poll_with_timeout(timeout, || {
            if !self.flush_pending()? {
                return Ok(None);
            }
            Ok(self.free_slots.pop_front())
        })
    }

    fn queue_input_buffer(
        &mut self,
        slot: usize,
        data: &[u8],
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> Result<()> {
        if !self.started {
            return Err(ShutterError::codec("input queued before the encoder was started"));
        }
        if self.eos_sent {
            return Err(ShutterError::codec("input queued after end of stream"));
        }

        if flags.end_of_stream {
            self.free_slots.push_back(slot);
            self.encoder_mut()?
                .send_eof()
                .map_err(|e| ShutterError::codec(format!("Failed to send EOF: {}", e)))?;
            self.eos_sent = true;
            debug!(
                "Encoder {} signalled end of stream after {} frames",
                self.name, self.frames_in
            );
            return Ok(());
        }

        let frame = self.fill_frame(data, presentation_time_us)?;
        self.pending = Some((slot, frame));
        self.flush_pending()?;
        trace!("Queued frame: pts={}us", presentation_time_us);
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<OutputEvent> {
        if !self.format_reported {
            self.format_reported = true;
            return Ok(OutputEvent::FormatChanged(self.track_format()?));
        }
        if self.eos_delivered {
            return Ok(OutputEvent::TryAgainLater);
        }

        let Some(sample) = poll_with_timeout(timeout, || self.receive_sample())? else {
            return Ok(OutputEvent::TryAgainLater);
        };

        let index = self.next_output;
        self.next_output += 1;
        self.outstanding.push_back(index);
        Ok(OutputEvent::Sample { index, sample })
    }

    fn release_output_buffer(&mut self, index: usize) -> Result<()> {
        match self.outstanding.iter().position(|&i| i == index) {
            Some(pos) => {
                self.outstanding.remove(pos);
                Ok(())
            }
            None => Err(ShutterError::codec(format!(
                "output buffer {} is not held by the caller",
                index
            ))),
        }
    }

    fn stop(&mut self) -> Result<()> {
        if self.started {
            self.started = false;
            debug!(
                "Encoder {} stopped ({} frames in, {} packets out)",
                self.name, self.frames_in, self.packets_out
            );
        }
        Ok(())
    }

    fn release(&mut self) {
        self.pending = None;
        self.outstanding.clear();
        if self.encoder.take().is_some() {
            debug!("Encoder {} released", self.name);
        }
    }
}

/// Find an H.264 encoder, honoring an explicit override
pub fn select_h264_encoder(
    preferred: Option<&str>,
) -> Result<(&'static str, ffmpeg::Codec)> {
    if let Some(name) = preferred {
        let static_name = H264_ENCODERS
            .iter()
            .copied()
            .find(|candidate| *candidate == name)
            .ok_or_else(|| {
                ShutterError::unavailable(format!(
                    "Unknown H.264 encoder '{}'. Supported: {}",
                    name,
                    H264_ENCODERS.join(", ")
                ))
            })?;

        return encoder::find_by_name(static_name)
            .map(|codec| (static_name, codec))
            .ok_or_else(|| {
                ShutterError::unavailable(format!("Encoder {} not found in this FFmpeg build", name))
            });
    }

    H264_ENCODERS
        .iter()
        .find_map(|name| encoder::find_by_name(name).map(|codec| (*name, codec)))
        .ok_or_else(|| ShutterError::unavailable("No H.264 encoder available"))
}

/// H.264 encoders present in the linked FFmpeg
pub fn list_available_encoders() -> Vec<&'static str> {
    if ffmpeg::init().is_err() {
        return Vec::new();
    }
    H264_ENCODERS
        .iter()
        .copied()
        .filter(|name| encoder::find_by_name(name).is_some())
        .collect()
}
