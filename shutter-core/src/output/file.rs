//! MP4 container writer
//!
//! Writes an H.264 elementary stream into an MPEG-4 file through FFmpeg's
//! muxer. Timestamps arrive in microseconds and are rescaled to the
//! stream's time base.

use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use ffmpeg::codec::Id;
use ffmpeg::format::context::Output;
use ffmpeg::Rational;
use ffmpeg_next as ffmpeg;

use super::muxer::ContainerWriter;
use crate::error::{Result, ShutterError};
use crate::types::{ContainerFormat, EncodedSample, TrackFormat, MIME_AVC};

/// Time base of incoming sample timestamps (microseconds)
const MICROS: Rational = Rational(1, 1_000_000);

/// Preferred stream time base for MP4 video
const VIDEO_TIMESCALE: Rational = Rational(1, 90_000);

/// Zeroed padding FFmpeg expects after extradata
const INPUT_PADDING: usize = 64;

/// MPEG-4 file writer backed by FFmpeg
pub struct Mp4Container {
    /// Output path
    path: PathBuf,
    /// FFmpeg output context, `None` once released
    output: Option<Output>,
    /// Index of the video stream
    stream_index: Option<usize>,
    /// Nominal frame duration in microseconds
    frame_duration_us: i64,
    /// Whether the header has been written
    header_written: bool,
    /// Whether the trailer has been written
    trailer_written: bool,
    /// Packets written
    packets_written: u64,
}

impl Mp4Container {
    /// Create the output file
    pub fn create(path: impl Into<PathBuf>, container: ContainerFormat) -> Result<Self> {
        let path = path.into();

        ffmpeg::init().map_err(|e| ShutterError::muxer(format!("FFmpeg init failed: {}", e)))?;

        info!("Creating {} container: {:?}", container.muxer_name(), path);

        let output = ffmpeg::format::output_as(&path, container.muxer_name())
            .map_err(|e| ShutterError::muxer(format!("Failed to create output file: {}", e)))?;

        Ok(Self {
            path,
            output: Some(output),
            stream_index: None,
            frame_duration_us: 0,
            header_written: false,
            trailer_written: false,
            packets_written: 0,
        })
    }

    /// Get the output path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the number of packets written
    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    fn output_mut(&mut self) -> Result<&mut Output> {
        self.output
            .as_mut()
            .ok_or_else(|| ShutterError::muxer("container already released"))
    }
}

impl ContainerWriter for Mp4Container {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize> {
        let codec_id = match format.mime.as_str() {
            MIME_AVC => Id::H264,
            other => {
                return Err(ShutterError::muxer(format!("Unsupported track type: {}", other)));
            }
        };

        let output = self.output_mut()?;
        let index = {
            let mut stream = output
                .add_stream(codec_id)
                .map_err(|e| ShutterError::muxer(format!("Failed to add video stream: {}", e)))?;

            let codec_par = stream.parameters();
            // SAFETY: rust-ffmpeg has no safe setters for stream codec parameters.
            // The pointer comes from the stream we just created and stays valid for
            // the lifetime of the output context. Extradata is allocated with
            // av_mallocz so FFmpeg frees it together with the parameters.
            unsafe {
                let ptr = codec_par.as_ptr() as *mut ffmpeg::ffi::AVCodecParameters;
                (*ptr).codec_type = ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_VIDEO;
                (*ptr).codec_id = codec_id.into();
                (*ptr).width = format.width as i32;
                (*ptr).height = format.height as i32;
                (*ptr).bit_rate = format.bitrate_bps as i64;
                (*ptr).format = ffmpeg::ffi::AVPixelFormat::AV_PIX_FMT_YUV420P as i32;

                if !format.extradata.is_empty() {
                    let size = format.extradata.len();
                    let buf = ffmpeg::ffi::av_mallocz(size + INPUT_PADDING) as *mut u8;
                    if buf.is_null() {
                        return Err(ShutterError::muxer("Failed to allocate codec extradata"));
                    }
                    std::ptr::copy_nonoverlapping(format.extradata.as_ptr(), buf, size);
                    (*ptr).extradata = buf;
                    (*ptr).extradata_size = size as i32;
                }
            }

            stream.set_time_base(VIDEO_TIMESCALE);
            stream.set_avg_frame_rate(Rational::new(format.fps as i32, 1));
            stream.index()
        };

        self.stream_index = Some(index);
        self.frame_duration_us = 1_000_000 / format.fps.max(1) as i64;

        info!(
            "Container video track {}: {}x{} @ {}fps, {} kbps",
            index,
            format.width,
            format.height,
            format.fps,
            format.bitrate_bps / 1000
        );
        Ok(index)
    }

    fn start(&mut self) -> Result<()> {
        if self.header_written {
            return Ok(());
        }

        self.output_mut()?
            .write_header()
            .map_err(|e| ShutterError::muxer(format!("Failed to write file header: {}", e)))?;

        self.header_written = true;
        debug!("File header written");
        Ok(())
    }

    fn write_sample(&mut self, track_index: usize, sample: &EncodedSample) -> Result<()> {
        if self.stream_index != Some(track_index) {
            return Err(ShutterError::muxer(format!("No stream with index {}", track_index)));
        }

        let frame_duration_us = self.frame_duration_us;
        let output = self.output_mut()?;

        let mut pkt = ffmpeg::Packet::copy(sample.payload());
        pkt.set_stream(track_index);
        // No B-frames are produced, so decode order equals presentation order
        pkt.set_pts(Some(sample.presentation_time_us));
        pkt.set_dts(Some(sample.presentation_time_us));
        pkt.set_duration(frame_duration_us);

        if sample.flags.key_frame {
            pkt.set_flags(ffmpeg::packet::Flags::KEY);
        }

        // The muxer may have replaced the time base while writing the header
        let time_base = output
            .stream(track_index)
            .map(|s| s.time_base())
            .unwrap_or(VIDEO_TIMESCALE);

        pkt.rescale_ts(MICROS, time_base);

        pkt.write_interleaved(output)
            .map_err(|e| ShutterError::muxer(format!("Failed to write video packet: {}", e)))?;

        self.packets_written += 1;

        if self.packets_written % 1000 == 0 {
            debug!("Written {} video packets to {:?}", self.packets_written, self.path);
        }

        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.header_written || self.trailer_written {
            return Ok(());
        }

        self.trailer_written = true;
        self.output_mut()?
            .write_trailer()
            .map_err(|e| ShutterError::muxer(format!("Failed to write file trailer: {}", e)))?;

        info!(
            "Container complete: {:?} ({} packets)",
            self.path, self.packets_written
        );
        Ok(())
    }

    fn release(&mut self) {
        if self.output.take().is_some() {
            debug!("Container released: {:?}", self.path);
        }
    }
}

impl Drop for Mp4Container {
    fn drop(&mut self) {
        if self.header_written && !self.trailer_written {
            if let Some(output) = self.output.as_mut() {
                if let Err(e) = output.write_trailer() {
                    error!("Failed to write file trailer on drop: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_track_type_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let Ok(mut container) = Mp4Container::create(tmp.path().join("a.mp4"), ContainerFormat::Mp4)
        else {
            return;
        };

        let format = TrackFormat {
            mime: "audio/mp4a-latm".to_string(),
            width: 0,
            height: 0,
            fps: 0,
            bitrate_bps: 0,
            extradata: Vec::new(),
        };
        assert!(container.add_track(&format).is_err());
        container.release();
    }
}
