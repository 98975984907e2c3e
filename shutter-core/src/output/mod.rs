//! Video file output
//!
//! - [`OutputMuxer`] enforces track negotiation order over any [`ContainerWriter`]
//! - [`Mp4Container`] writes MPEG-4 files through FFmpeg
//! - [`naming`] builds timestamped output paths

mod file;
pub mod muxer;
pub mod naming;

pub use file::Mp4Container;
pub use muxer::{ContainerWriter, OutputMuxer};
