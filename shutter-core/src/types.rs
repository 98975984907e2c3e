//! Core types for Shutter
//!
//! These types represent the data that flows between the capture,
//! encode and mux stages.

use std::path::PathBuf;

use ffmpeg_next::format::Pixel;
use serde::{Deserialize, Serialize};

/// A compressed still (JPEG/PNG) captured by the timelapse loop
///
/// The index is the frame's position in the capture buffer. The bytes are
/// never modified after capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Position in the capture sequence
    pub index: usize,
    /// Compressed image bytes
    pub bytes: Vec<u8>,
}

impl RawFrame {
    /// Create a new raw frame
    pub fn new(index: usize, bytes: Vec<u8>) -> Self {
        Self { index, bytes }
    }

    /// Size of the compressed buffer in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Pixel layout of a live camera frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed 8-bit RGB
    Rgb24,
    /// Packed 8-bit RGBA
    Rgba,
    /// Packed 8-bit BGRA
    Bgra,
    /// Semi-planar 4:2:0 (Y plane + interleaved UV)
    Nv12,
    /// Planar 4:2:0 (Y, U, V planes)
    Yuv420p,
}

impl PixelFormat {
    /// Matching FFmpeg pixel format
    pub fn to_ffmpeg(self) -> Pixel {
        match self {
            Self::Rgb24 => Pixel::RGB24,
            Self::Rgba => Pixel::RGBA,
            Self::Bgra => Pixel::BGRA,
            Self::Nv12 => Pixel::NV12,
            Self::Yuv420p => Pixel::YUV420P,
        }
    }

    /// Bytes occupied by one frame of the given size
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            Self::Rgb24 => pixels * 3,
            Self::Rgba | Self::Bgra => pixels * 4,
            Self::Nv12 | Self::Yuv420p => {
                pixels + 2 * (width.div_ceil(2) as usize * height.div_ceil(2) as usize)
            }
        }
    }
}

/// Frame format information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel layout
    pub pixel_format: PixelFormat,
}

/// Uncompressed video frame pushed by the camera pipeline into a live recorder
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame format
    pub format: FrameFormat,
    /// Tightly packed pixel data
    pub data: Vec<u8>,
    /// Capture timestamp in nanoseconds (informational only)
    pub pts: u64,
}

/// Flags attached to encoder input and output buffers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFlags {
    /// Independently decodable frame
    pub key_frame: bool,
    /// Codec configuration data (SPS/PPS), not media
    pub codec_config: bool,
    /// Last buffer of the stream
    pub end_of_stream: bool,
}

impl SampleFlags {
    /// No flags set
    pub const NONE: Self = Self {
        key_frame: false,
        codec_config: false,
        end_of_stream: false,
    };

    /// End-of-stream marker
    pub const END_OF_STREAM: Self = Self {
        key_frame: false,
        codec_config: false,
        end_of_stream: true,
    };

    /// Key frame marker
    pub const KEY_FRAME: Self = Self {
        key_frame: true,
        codec_config: false,
        end_of_stream: false,
    };

    /// Codec-config marker
    pub const CODEC_CONFIG: Self = Self {
        key_frame: false,
        codec_config: true,
        end_of_stream: false,
    };
}

/// One encoded access unit produced by the encoder
///
/// Consumed immediately by the muxer; never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSample {
    /// Backing buffer
    pub data: Vec<u8>,
    /// Offset of the payload within `data`
    pub offset: usize,
    /// Payload length in bytes
    pub size: usize,
    /// Presentation timestamp in microseconds
    pub presentation_time_us: i64,
    /// Buffer flags
    pub flags: SampleFlags,
}

impl EncodedSample {
    /// Create a sample whose payload spans the whole buffer
    pub fn new(data: Vec<u8>, presentation_time_us: i64, flags: SampleFlags) -> Self {
        let size = data.len();
        Self {
            data,
            offset: 0,
            size,
            presentation_time_us,
            flags,
        }
    }

    /// Empty end-of-stream sample
    pub fn end_of_stream(presentation_time_us: i64) -> Self {
        Self::new(Vec::new(), presentation_time_us, SampleFlags::END_OF_STREAM)
    }

    /// Payload bytes
    pub fn payload(&self) -> &[u8] {
        let end = (self.offset + self.size).min(self.data.len());
        &self.data[self.offset.min(end)..end]
    }

    /// Whether this buffer carries media that belongs in the container
    pub fn is_media(&self) -> bool {
        self.size > 0 && !self.flags.codec_config
    }
}

/// Output format reported by the encoder once it knows its stream parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFormat {
    /// MIME type of the stream ("video/avc")
    pub mime: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Nominal frame rate
    pub fps: u32,
    /// Target bitrate in bits per second
    pub bitrate_bps: u64,
    /// Codec-specific data (avcC SPS/PPS) for the container header
    pub extradata: Vec<u8>,
}

/// MIME type of an H.264 stream
pub const MIME_AVC: &str = "video/avc";

/// Container formats the muxer can write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// MPEG-4 Part 14
    #[default]
    Mp4,
}

impl ContainerFormat {
    /// FFmpeg muxer short name
    pub fn muxer_name(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
        }
    }

    /// File extension without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
        }
    }
}

/// Where an encode run writes and which track it negotiated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDescriptor {
    /// Output file path
    pub file_path: PathBuf,
    /// Container format
    pub container_format: ContainerFormat,
    /// Track index, assigned once when the encoder reports its format
    pub track_index: Option<usize>,
}

impl OutputDescriptor {
    /// Create a descriptor with no track assigned yet
    pub fn new(file_path: impl Into<PathBuf>, container_format: ContainerFormat) -> Self {
        Self {
            file_path: file_path.into(),
            container_format,
            track_index: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size() {
        assert_eq!(PixelFormat::Rgb24.frame_size(4, 2), 24);
        assert_eq!(PixelFormat::Bgra.frame_size(4, 2), 32);
        assert_eq!(PixelFormat::Yuv420p.frame_size(4, 2), 8 + 4);
        // Odd sizes round chroma up
        assert_eq!(PixelFormat::Nv12.frame_size(3, 3), 9 + 8);
    }

    #[test]
    fn test_sample_payload_window() {
        let mut sample = EncodedSample::new(vec![1, 2, 3, 4, 5], 0, SampleFlags::NONE);
        sample.offset = 1;
        sample.size = 3;
        assert_eq!(sample.payload(), &[2, 3, 4]);
    }

    #[test]
    fn test_codec_config_is_not_media() {
        let sample = EncodedSample::new(vec![0, 0, 1], 0, SampleFlags::CODEC_CONFIG);
        assert!(!sample.is_media());
        assert!(!EncodedSample::end_of_stream(0).is_media());
    }
}
