//! Live recording session
//!
//! Drives one [`Recorder`] through prepare, start, pause, resume and stop,
//! and publishes the session state and elapsed recording time.
//!
//! Operations that are not valid from the current state are rejected with a
//! [`TransitionRejected`] and leave the session untouched. Runtime failures
//! of the recorder are logged and the recorder is released.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::backend::{CaptureTarget, Recorder, RecorderBackend, RecorderSettings, RecorderStats};
use super::state::{RecordOp, RecordState, TransitionRejected};
use crate::config::{RecordingConfig, VideoQualityPreset};
use crate::error::{Result, ShutterError};
use crate::output::naming;

/// How often the elapsed time is published while recording
pub const DURATION_TICK: Duration = Duration::from_millis(500);

/// Hook called with the path of every successfully finalized recording
pub type MediaRegistrar = Box<dyn Fn(&Path) + Send + Sync>;

/// Background thread that publishes elapsed time
struct Ticker {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Elapsed recording time, excluding paused intervals
struct DurationClock {
    accumulated: Duration,
    running_since: Option<Instant>,
    ticker: Option<Ticker>,
    tx: Arc<watch::Sender<u64>>,
}

impl DurationClock {
    fn new(tx: Arc<watch::Sender<u64>>) -> Self {
        Self {
            accumulated: Duration::ZERO,
            running_since: None,
            ticker: None,
            tx,
        }
    }

    fn elapsed(&self) -> Duration {
        self.accumulated + self.running_since.map(|t| t.elapsed()).unwrap_or_default()
    }

    fn run(&mut self) {
        if self.running_since.is_some() {
            return;
        }

        let started = Instant::now();
        self.running_since = Some(started);

        let base = self.accumulated;
        let tx = Arc::clone(&self.tx);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let spawned = std::thread::Builder::new()
            .name("shutter-duration".into())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(DURATION_TICK) {
                    Err(RecvTimeoutError::Timeout) => {
                        tx.send_replace((base + started.elapsed()).as_millis() as u64);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        match spawned {
            Ok(handle) => self.ticker = Some(Ticker { shutdown_tx, handle }),
            Err(e) => warn!("Failed to spawn duration timer: {}", e),
        }
    }

    fn halt_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.shutdown_tx.send(());
            if ticker.handle.join().is_err() {
                warn!("Duration timer thread panicked");
            }
        }
    }

    fn freeze(&mut self) {
        self.halt_ticker();
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
        self.tx.send_replace(self.accumulated.as_millis() as u64);
    }

    fn reset(&mut self) {
        self.halt_ticker();
        self.running_since = None;
        self.accumulated = Duration::ZERO;
        self.tx.send_replace(0);
    }
}

/// A live recording session over a recorder backend
pub struct RecordingSession<B: RecorderBackend> {
    backend: B,
    output_dir: PathBuf,
    prefix: String,
    encoder: Option<String>,
    state: RecordState,
    recorder: Option<Box<dyn Recorder>>,
    output_path: Option<PathBuf>,
    state_tx: watch::Sender<RecordState>,
    clock: DurationClock,
    registrar: Option<MediaRegistrar>,
}

impl<B: RecorderBackend> RecordingSession<B> {
    /// Create an idle session writing to `config.output_dir`
    pub fn new(backend: B, config: &RecordingConfig) -> Self {
        let (state_tx, _) = watch::channel(RecordState::Idle);
        let (duration_tx, _) = watch::channel(0u64);

        Self {
            backend,
            output_dir: config.output_dir.clone(),
            prefix: config.prefix.clone(),
            encoder: config.encoder.clone(),
            state: RecordState::Idle,
            recorder: None,
            output_path: None,
            state_tx,
            clock: DurationClock::new(Arc::new(duration_tx)),
            registrar: None,
        }
    }

    /// Call `registrar` with every successfully finalized recording
    pub fn with_registrar(mut self, registrar: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        self.registrar = Some(Box::new(registrar));
        self
    }

    /// Current state
    pub fn state(&self) -> RecordState {
        self.state
    }

    /// Observe state changes
    pub fn subscribe_state(&self) -> watch::Receiver<RecordState> {
        self.state_tx.subscribe()
    }

    /// Observe elapsed recording time in milliseconds
    pub fn subscribe_duration(&self) -> watch::Receiver<u64> {
        self.clock.tx.subscribe()
    }

    /// Elapsed recording time, excluding pauses
    pub fn duration(&self) -> Duration {
        self.clock.elapsed()
    }

    /// File the current recording is written to
    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    /// Whether the recorder supports pause/resume
    pub fn supports_pause(&self) -> bool {
        self.recorder.as_ref().is_some_and(|r| r.supports_pause())
    }

    /// Frame counters of the current recorder
    pub fn recorder_stats(&self) -> Option<RecorderStats> {
        self.recorder.as_ref().map(|r| r.stats())
    }

    fn set_state(&mut self, state: RecordState) {
        if self.state != state {
            debug!("Recording state: {} -> {}", self.state, state);
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn check(&self, op: RecordOp) -> std::result::Result<RecordState, TransitionRejected> {
        self.state.apply(op).inspect_err(|rejected| {
            warn!("Ignoring {} request: {}", op, rejected);
        })
    }

    /// Allocate a recorder and return the surface frames should be pushed into
    ///
    /// Valid only while idle. On failure the session stays idle.
    pub fn prepare(
        &mut self,
        quality: VideoQualityPreset,
        audio_enabled: bool,
    ) -> Result<CaptureTarget> {
        let next = self.check(RecordOp::Prepare)?;

        let output_path = naming::next_output_path(&self.output_dir, &self.prefix)?;
        let settings = RecorderSettings {
            quality,
            audio_enabled,
            output_path: output_path.clone(),
            encoder: self.encoder.clone(),
        };

        let recorder = self
            .backend
            .open(&settings)
            .inspect_err(|e| error!("Failed to prepare {} recorder: {}", quality, e))?;

        let target = recorder.capture_target();
        info!(
            "Recorder prepared: {} ({}x{} @ {}fps), audio {}, output {:?}",
            quality,
            quality.width(),
            quality.height(),
            quality.fps(),
            if audio_enabled { "on" } else { "off" },
            output_path
        );

        self.recorder = Some(recorder);
        self.output_path = Some(output_path);
        self.set_state(next);
        Ok(target)
    }

    /// Begin recording. Valid only after [`prepare`](Self::prepare).
    pub fn start(&mut self) -> Result<RecordState> {
        let next = self.check(RecordOp::Start)?;
        let recorder = self
            .recorder
            .as_mut()
            .ok_or_else(|| ShutterError::codec("prepared session has no recorder"))?;

        if let Err(e) = recorder.start() {
            error!("Failed to start recording: {}", e);
            self.release();
            return Err(e);
        }

        self.clock.run();
        self.set_state(next);
        info!("Recording started");
        Ok(next)
    }

    /// Pause recording. Valid only while recording.
    pub fn pause(&mut self) -> Result<RecordState> {
        let next = self.check(RecordOp::Pause)?;
        let recorder = self
            .recorder
            .as_mut()
            .ok_or_else(|| ShutterError::codec("recording session has no recorder"))?;

        if !recorder.supports_pause() {
            warn!("Recorder does not support pause");
            return Err(TransitionRejected::Unsupported { op: RecordOp::Pause }.into());
        }

        recorder.pause().inspect_err(|e| error!("Failed to pause recording: {}", e))?;

        self.clock.freeze();
        self.set_state(next);
        info!("Recording paused at {:.1}s", self.duration().as_secs_f64());
        Ok(next)
    }

    /// Resume after a pause. Valid only while paused.
    pub fn resume(&mut self) -> Result<RecordState> {
        let next = self.check(RecordOp::Resume)?;
        let recorder = self
            .recorder
            .as_mut()
            .ok_or_else(|| ShutterError::codec("paused session has no recorder"))?;

        if !recorder.supports_pause() {
            return Err(TransitionRejected::Unsupported { op: RecordOp::Resume }.into());
        }

        recorder.resume().inspect_err(|e| error!("Failed to resume recording: {}", e))?;

        self.clock.run();
        self.set_state(next);
        info!("Recording resumed");
        Ok(next)
    }

    /// Finalize the recording and return the output file
    ///
    /// Returns `None` if the session was not recording or the recorder failed
    /// to finalize. The recorder is released either way.
    pub fn stop(&mut self) -> Option<PathBuf> {
        let next = self.check(RecordOp::Stop).ok()?;

        self.clock.freeze();
        let mut recorder = self.recorder.take()?;
        let stopped = recorder.stop();
        recorder.release();

        self.set_state(next);
        let path = self.output_path.take()?;

        match stopped {
            Ok(()) => {
                info!(
                    "Recording saved: {:?} ({:.1}s)",
                    path,
                    self.duration().as_secs_f64()
                );
                if let Some(registrar) = &self.registrar {
                    registrar(&path);
                }
                Some(path)
            }
            Err(e) => {
                error!("Failed to finalize recording {:?}: {}", path, e);
                None
            }
        }
    }

    /// Free the recorder and return to idle. Safe to call at any time.
    pub fn release(&mut self) {
        self.clock.reset();
        if let Some(mut recorder) = self.recorder.take() {
            recorder.release();
            debug!("Recorder released");
        }
        self.output_path = None;
        self.set_state(RecordState::Idle);
    }
}

impl<B: RecorderBackend> Drop for RecordingSession<B> {
    fn drop(&mut self) {
        if self.state != RecordState::Idle {
            self.release();
        }
    }
}
