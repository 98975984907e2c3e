//! Frame capture for timelapses
//!
//! The [`FrameAccumulator`] periodically invokes a capture callback and
//! buffers the compressed stills it returns until the session is stopped.

mod accumulator;

pub use accumulator::{FrameAccumulator, DEFAULT_OUTPUT_FPS};
