//! Frame scaling and format conversion
//!
//! Converts live camera frames of any supported layout and size into the
//! planar YUV420 buffers the encoder consumes.

use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{self, Flags};
use ffmpeg_next::util::frame::video::Video;
use tracing::debug;

use crate::error::{Result, ShutterError};
use crate::types::{Frame, FrameFormat, PixelFormat};

/// Frame scaler for resolution and format conversion
pub struct FrameScaler {
    /// FFmpeg scaling context
    context: scaling::Context,
    /// Source layout this context was built for
    source: FrameFormat,
    /// Output frame buffer
    output: Video,
    /// Output width
    width: u32,
    /// Output height
    height: u32,
}

impl FrameScaler {
    /// Create a scaler from `source` to YUV420P at `dst_width`x`dst_height`
    pub fn new(source: FrameFormat, dst_width: u32, dst_height: u32) -> Result<Self> {
        debug!(
            "Creating scaler: {:?} {}x{} -> YUV420P {}x{}",
            source.pixel_format, source.width, source.height, dst_width, dst_height
        );

        let context = scaling::Context::get(
            source.pixel_format.to_ffmpeg(),
            source.width,
            source.height,
            Pixel::YUV420P,
            dst_width,
            dst_height,
            Flags::BILINEAR,
        )
        .map_err(|e| ShutterError::codec(format!("Failed to create scaler: {}", e)))?;

        Ok(Self {
            context,
            source,
            output: Video::new(Pixel::YUV420P, dst_width, dst_height),
            width: dst_width,
            height: dst_height,
        })
    }

    /// Whether this scaler was built for `format`
    pub fn accepts(&self, format: &FrameFormat) -> bool {
        self.source == *format
    }

    /// Scale a frame and return it as a contiguous I420 buffer
    pub fn scale_to_i420(&mut self, frame: &Frame) -> Result<Vec<u8>> {
        if !self.accepts(&frame.format) {
            return Err(ShutterError::codec(format!(
                "scaler built for {:?}, got {:?}",
                self.source, frame.format
            )));
        }

        let input = frame_to_video(frame)?;
        self.context
            .run(&input, &mut self.output)
            .map_err(|e| ShutterError::codec(format!("Scaling failed: {}", e)))?;

        Ok(pack_planes(&self.output, self.width, self.height))
    }
}

/// Copy a tightly packed frame into an FFmpeg frame with padded strides
fn frame_to_video(frame: &Frame) -> Result<Video> {
    let FrameFormat {
        width,
        height,
        pixel_format,
    } = frame.format;

    let expected = pixel_format.frame_size(width, height);
    if frame.data.len() < expected {
        return Err(ShutterError::codec(format!(
            "frame holds {} bytes, {:?} {}x{} needs {}",
            frame.data.len(),
            pixel_format,
            width,
            height,
            expected
        )));
    }

    let w = width as usize;
    let h = height as usize;
    let cw = width.div_ceil(2) as usize;
    let ch = height.div_ceil(2) as usize;

    // (row bytes, rows) per plane, in storage order
    let layout: Vec<(usize, usize)> = match pixel_format {
        PixelFormat::Rgb24 => vec![(w * 3, h)],
        PixelFormat::Rgba | PixelFormat::Bgra => vec![(w * 4, h)],
        PixelFormat::Nv12 => vec![(w, h), (cw * 2, ch)],
        PixelFormat::Yuv420p => vec![(w, h), (cw, ch), (cw, ch)],
    };

    let mut video = Video::new(pixel_format.to_ffmpeg(), width, height);
    let mut offset = 0;
    for (plane, (row_len, rows)) in layout.into_iter().enumerate() {
        let stride = video.stride(plane);
        let dst = video.data_mut(plane);
        for row in 0..rows {
            dst[row * stride..row * stride + row_len]
                .copy_from_slice(&frame.data[offset..offset + row_len]);
            offset += row_len;
        }
    }

    Ok(video)
}

/// Strip line padding from a YUV420P frame
fn pack_planes(video: &Video, width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(PixelFormat::Yuv420p.frame_size(width, height));
    let cw = width.div_ceil(2) as usize;
    let ch = height.div_ceil(2) as usize;

    for (plane, row_len, rows) in [
        (0, width as usize, height as usize),
        (1, cw, ch),
        (2, cw, ch),
    ] {
        let stride = video.stride(plane);
        let data = video.data(plane);
        for row in 0..rows {
            out.extend_from_slice(&data[row * stride..row * stride + row_len]);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_frame_rejected() {
        let frame = Frame {
            format: FrameFormat {
                width: 4,
                height: 4,
                pixel_format: PixelFormat::Rgb24,
            },
            data: vec![0; 10],
            pts: 0,
        };
        assert!(frame_to_video(&frame).is_err());
    }
}
