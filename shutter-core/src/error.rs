//! Error types for Shutter

use thiserror::Error;

use crate::record::TransitionRejected;

/// Result type alias using ShutterError
pub type Result<T> = std::result::Result<T, ShutterError>;

/// Main error type for Shutter operations
#[derive(Debug, Error)]
pub enum ShutterError {
    /// Recorder or encoder could not be allocated (unsupported format, missing codec)
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Operation not permitted from the current recording state
    #[error("Invalid state transition: {0}")]
    InvalidTransition(TransitionRejected),

    /// Encoder runtime failure (start, queue, drain, stop)
    #[error("Codec error: {0}")]
    Codec(String),

    /// Container writer runtime failure
    #[error("Muxer error: {0}")]
    Muxer(String),

    /// A buffered still could not be decoded
    #[error("Frame decode failed: {0}")]
    FrameDecode(String),

    /// Track/start/write ordering between encoder and muxer was violated
    #[error("Encoder format negotiation error: {0}")]
    FormatNegotiation(String),

    /// The encoder made no progress within the configured stall timeout
    #[error("Encoder stalled for {0:?}")]
    EncoderStalled(std::time::Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ShutterError>,
    },
}

impl ShutterError {
    /// Create a resource-unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::ResourceUnavailable(msg.into())
    }

    /// Create a codec error
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    /// Create a muxer error
    pub fn muxer(msg: impl Into<String>) -> Self {
        Self::Muxer(msg.into())
    }

    /// Create a frame decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::FrameDecode(msg.into())
    }

    /// Create a format negotiation error
    pub fn negotiation(msg: impl Into<String>) -> Self {
        Self::FormatNegotiation(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with all context layers removed
    pub fn root(&self) -> &ShutterError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Short hint for the user on how to fix the problem, if there is one
    pub fn user_hint(&self) -> Option<&'static str> {
        match self.root() {
            Self::ResourceUnavailable(_) => Some(
                "Check that FFmpeg was built with an H.264 encoder (see `shutter info`) \
                 or pick a lower quality preset",
            ),
            Self::InvalidTransition(_) => {
                Some("Recording operations must follow prepare -> start -> stop")
            }
            Self::FrameDecode(_) => Some("Captured stills must be JPEG or PNG images"),
            Self::EncoderStalled(_) => Some(
                "The hardware encoder stopped responding; retry or raise stall_timeout_ms in config.toml",
            ),
            Self::Config(_) => Some("Check ~/.config/shutter/config.toml or run `shutter config init`"),
            Self::Io(_) => Some("Check that the output directory exists and is writable"),
            Self::Codec(_) | Self::Muxer(_) | Self::FormatNegotiation(_) => None,
            Self::WithContext { .. } => None,
        }
    }

    /// Whether the user can fix this without code changes
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self.root(),
            Self::ResourceUnavailable(_)
                | Self::InvalidTransition(_)
                | Self::FrameDecode(_)
                | Self::EncoderStalled(_)
                | Self::Config(_)
                | Self::Io(_)
        )
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl From<TransitionRejected> for ShutterError {
    fn from(rejected: TransitionRejected) -> Self {
        Self::InvalidTransition(rejected)
    }
}

impl From<ffmpeg_next::Error> for ShutterError {
    fn from(err: ffmpeg_next::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<image::ImageError> for ShutterError {
    fn from(err: image::ImageError) -> Self {
        Self::FrameDecode(err.to_string())
    }
}
