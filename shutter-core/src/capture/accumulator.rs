//! Periodic still capture
//!
//! A background task calls the capture callback, waits one interval, and
//! repeats until stopped. The task owns the frame buffer outright and hands
//! it back through its join handle, so no lock guards the buffer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::types::RawFrame;

/// Playback framerate assumed before the first `start`
pub const DEFAULT_OUTPUT_FPS: u32 = 30;

struct CaptureLoop {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<Vec<RawFrame>>,
}

/// Buffers stills captured at a fixed interval
pub struct FrameAccumulator {
    output_fps: u32,
    frame_count: Arc<watch::Sender<usize>>,
    running: Option<CaptureLoop>,
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAccumulator {
    /// Create an idle accumulator
    pub fn new() -> Self {
        let (frame_count, _) = watch::channel(0);
        Self {
            output_fps: DEFAULT_OUTPUT_FPS,
            frame_count: Arc::new(frame_count),
            running: None,
        }
    }

    /// Whether a capture loop is running
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Frames buffered so far
    pub fn frame_count(&self) -> usize {
        *self.frame_count.borrow()
    }

    /// Observe the number of buffered frames
    pub fn subscribe_frame_count(&self) -> watch::Receiver<usize> {
        self.frame_count.subscribe()
    }

    /// Start capturing every `interval`
    ///
    /// `capture` returns the compressed still for one tick, or `None` to skip
    /// it. Does nothing if a loop is already running. Must be called from
    /// within a Tokio runtime.
    pub fn start<F, Fut>(&mut self, interval: Duration, output_fps: u32, capture: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Vec<u8>>> + Send + 'static,
    {
        if self.running.is_some() {
            warn!("Timelapse capture already running; ignoring start");
            return;
        }

        self.output_fps = output_fps.max(1);
        self.frame_count.send_replace(0);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let frame_count = Arc::clone(&self.frame_count);
        let handle = tokio::spawn(capture_loop(interval, capture, frame_count, shutdown_rx));

        info!(
            "Timelapse capture started: every {}ms, {}fps playback",
            interval.as_millis(),
            self.output_fps
        );
        self.running = Some(CaptureLoop {
            shutdown_tx,
            handle,
        });
    }

    /// Stop capturing and take the buffered frames
    ///
    /// Returns an empty buffer if no loop was running.
    pub async fn stop(&mut self) -> Vec<RawFrame> {
        let Some(running) = self.running.take() else {
            return Vec::new();
        };

        let _ = running.shutdown_tx.send(());
        let frames = match running.handle.await {
            Ok(frames) => frames,
            Err(e) => {
                error!("Timelapse capture task failed: {}", e);
                Vec::new()
            }
        };

        self.frame_count.send_replace(0);
        info!("Timelapse capture stopped with {} frames", frames.len());
        frames
    }

    /// Playback length of the buffered frames in seconds
    ///
    /// Depends only on the frame count and output framerate; the capture
    /// interval does not affect playback length.
    pub fn estimated_duration_secs(&self, _capture_interval: Duration) -> f64 {
        self.frame_count() as f64 / self.output_fps as f64
    }
}

async fn capture_loop<F, Fut>(
    interval: Duration,
    capture: F,
    frame_count: Arc<watch::Sender<usize>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> Vec<RawFrame>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Option<Vec<u8>>>,
{
    let mut frames = Vec::new();

    loop {
        match capture().await {
            Some(bytes) => {
                trace!("Captured still {} ({} bytes)", frames.len(), bytes.len());
                frames.push(RawFrame::new(frames.len(), bytes));
                frame_count.send_replace(frames.len());
            }
            None => debug!("Capture returned no still; skipping tick"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = &mut shutdown_rx => break,
        }
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_captures_every_interval() {
        let mut acc = FrameAccumulator::new();
        acc.start(Duration::from_millis(1000), 30, || async { Some(vec![1, 2, 3]) });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(acc.frame_count(), 4);

        let frames = acc.stop().await;
        assert_eq!(frames.len(), 4);
        assert_eq!(
            frames.iter().map(|f| f.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert_eq!(acc.frame_count(), 0);
        assert!(!acc.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_none_ticks_are_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut acc = FrameAccumulator::new();
        acc.start(Duration::from_millis(100), 30, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { (n % 2 == 0).then(|| vec![n as u8]) }
        });

        tokio::time::sleep(Duration::from_millis(550)).await;
        let frames = acc.stop().await;

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].bytes, vec![4]);
        assert_eq!(frames[2].index, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_ignored() {
        let mut acc = FrameAccumulator::new();
        acc.start(Duration::from_millis(100), 30, || async { Some(vec![0]) });
        acc.start(Duration::from_millis(1), 60, || async { Some(vec![1]) });

        tokio::time::sleep(Duration::from_millis(250)).await;
        let frames = acc.stop().await;
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.bytes == vec![0]));
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let mut acc = FrameAccumulator::new();
        assert!(acc.stop().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_estimated_duration_ignores_interval() {
        let mut acc = FrameAccumulator::new();
        acc.start(Duration::from_millis(10), 30, || async { Some(vec![0]) });
        tokio::time::sleep(Duration::from_millis(595)).await;

        assert_eq!(acc.frame_count(), 60);
        assert_eq!(acc.estimated_duration_secs(Duration::from_millis(10)), 2.0);
        assert_eq!(acc.estimated_duration_secs(Duration::from_secs(60)), 2.0);
        acc.stop().await;
    }
}
