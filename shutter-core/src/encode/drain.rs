//! Encoder output draining
//!
//! Moves encoded samples from the encoder's output queue into the muxer.
//!
//! ```text
//! AwaitFormat --format changed--> Draining --EOS submitted--> AwaitEos --EOS sample--> Done
//!      \                                                        ^
//!       `--format changed (EOS already submitted)---------------'
//! ```

use std::time::Duration;
use tracing::{debug, trace};

use super::codec::{HardwareEncoder, OutputEvent};
use crate::error::{Result, ShutterError};
use crate::output::muxer::{ContainerWriter, OutputMuxer};

/// Upper bound on output events handled by one [`Drain::tick`]
pub const MAX_DRAIN_ITERATIONS: usize = 64;

/// Where the drain loop is in the encoder's output lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPhase {
    /// Waiting for the encoder to report its output format
    AwaitFormat,
    /// Forwarding samples while input is still being fed
    Draining,
    /// Input finished; forwarding samples until the end-of-stream buffer
    AwaitEos,
    /// End of stream seen
    Done,
}

/// Outcome of one drain tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainTick {
    /// The encoder had nothing ready
    Idle,
    /// At least one output event was handled
    Progress,
    /// The end-of-stream buffer was reached
    Finished,
}

/// Drain state for one encode run
#[derive(Debug)]
pub struct Drain {
    phase: DrainPhase,
    eos_requested: bool,
    track_index: Option<usize>,
    samples_written: u64,
    skipped_buffers: u64,
}

impl Default for Drain {
    fn default() -> Self {
        Self::new()
    }
}

impl Drain {
    /// Start waiting for the encoder's output format
    pub fn new() -> Self {
        Self {
            phase: DrainPhase::AwaitFormat,
            eos_requested: false,
            track_index: None,
            samples_written: 0,
            skipped_buffers: 0,
        }
    }

    /// Current phase
    pub fn phase(&self) -> DrainPhase {
        self.phase
    }

    /// Whether the end-of-stream buffer has been seen
    pub fn is_done(&self) -> bool {
        self.phase == DrainPhase::Done
    }

    /// Samples handed to the muxer so far
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Empty and codec-config buffers that were not muxed
    pub fn skipped_buffers(&self) -> u64 {
        self.skipped_buffers
    }

    /// Record that the end-of-stream input buffer has been submitted
    pub fn expect_end_of_stream(&mut self) {
        self.eos_requested = true;
        if self.phase == DrainPhase::Draining {
            self.phase = DrainPhase::AwaitEos;
        }
    }

    /// Handle output events until the encoder has nothing ready, the end of
    /// stream is reached, or [`MAX_DRAIN_ITERATIONS`] events were handled
    pub fn tick<E, W>(
        &mut self,
        encoder: &mut E,
        muxer: &mut OutputMuxer<W>,
        timeout: Duration,
    ) -> Result<DrainTick>
    where
        E: HardwareEncoder + ?Sized,
        W: ContainerWriter,
    {
        if self.is_done() {
            return Ok(DrainTick::Finished);
        }

        let mut handled = 0;
        while handled < MAX_DRAIN_ITERATIONS {
            match encoder.dequeue_output_buffer(timeout)? {
                OutputEvent::TryAgainLater => break,
                OutputEvent::FormatChanged(format) => {
                    if self.phase != DrainPhase::AwaitFormat {
                        return Err(ShutterError::negotiation(
                            "encoder reported its output format more than once",
                        ));
                    }

                    let track = muxer.add_track(&format)?;
                    muxer.start()?;
                    self.track_index = Some(track);
                    self.phase = if self.eos_requested {
                        DrainPhase::AwaitEos
                    } else {
                        DrainPhase::Draining
                    };
                    debug!("Output format negotiated, track {}", track);
                }
                OutputEvent::Sample { index, sample } => {
                    let Some(track) = self.track_index else {
                        encoder.release_output_buffer(index)?;
                        return Err(ShutterError::negotiation(
                            "encoder produced data before reporting its output format",
                        ));
                    };

                    if sample.is_media() {
                        let written = muxer.write_sample_data(track, &sample);
                        encoder.release_output_buffer(index)?;
                        written?;
                        self.samples_written += 1;
                    } else {
                        trace!(
                            "Skipping output buffer: size={}, codec_config={}",
                            sample.size,
                            sample.flags.codec_config
                        );
                        self.skipped_buffers += 1;
                        encoder.release_output_buffer(index)?;
                    }

                    if sample.flags.end_of_stream {
                        self.phase = DrainPhase::Done;
                        debug!(
                            "End of stream reached after {} samples",
                            self.samples_written
                        );
                        return Ok(DrainTick::Finished);
                    }
                }
            }
            handled += 1;
        }

        Ok(if handled == 0 {
            DrainTick::Idle
        } else {
            DrainTick::Progress
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ContainerFormat, EncodedSample, OutputDescriptor, SampleFlags, TrackFormat, MIME_AVC,
    };
    use std::collections::VecDeque;

    struct ScriptedEncoder {
        events: VecDeque<OutputEvent>,
        released: Vec<usize>,
    }

    impl ScriptedEncoder {
        fn new(events: Vec<OutputEvent>) -> Self {
            Self {
                events: events.into(),
                released: Vec::new(),
            }
        }
    }

    impl HardwareEncoder for ScriptedEncoder {
        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn dequeue_input_buffer(&mut self, _timeout: Duration) -> Result<Option<usize>> {
            Ok(Some(0))
        }

        fn queue_input_buffer(
            &mut self,
            _slot: usize,
            _data: &[u8],
            _pts: i64,
            _flags: SampleFlags,
        ) -> Result<()> {
            Ok(())
        }

        fn dequeue_output_buffer(&mut self, _timeout: Duration) -> Result<OutputEvent> {
            Ok(self.events.pop_front().unwrap_or(OutputEvent::TryAgainLater))
        }

        fn release_output_buffer(&mut self, index: usize) -> Result<()> {
            self.released.push(index);
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        fn release(&mut self) {}
    }

    #[derive(Default)]
    struct VecWriter {
        pts: Vec<i64>,
    }

    impl ContainerWriter for VecWriter {
        fn add_track(&mut self, _format: &TrackFormat) -> Result<usize> {
            Ok(0)
        }

        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn write_sample(&mut self, _track: usize, sample: &EncodedSample) -> Result<()> {
            self.pts.push(sample.presentation_time_us);
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        fn release(&mut self) {}
    }

    fn format_changed() -> OutputEvent {
        OutputEvent::FormatChanged(TrackFormat {
            mime: MIME_AVC.to_string(),
            width: 16,
            height: 16,
            fps: 30,
            bitrate_bps: 1_000_000,
            extradata: vec![1, 2, 3],
        })
    }

    fn sample(index: usize, pts: i64, flags: SampleFlags) -> OutputEvent {
        OutputEvent::Sample {
            index,
            sample: EncodedSample::new(vec![0xAB; 8], pts, flags),
        }
    }

    fn muxer() -> OutputMuxer<VecWriter> {
        OutputMuxer::new(
            VecWriter::default(),
            OutputDescriptor::new("/tmp/drain.mp4", ContainerFormat::Mp4),
        )
    }

    #[test]
    fn test_drain_to_end_of_stream() {
        let mut encoder = ScriptedEncoder::new(vec![
            format_changed(),
            sample(0, 0, SampleFlags::KEY_FRAME),
            sample(1, 33_333, SampleFlags::NONE),
        ]);
        let mut muxer = muxer();
        let mut drain = Drain::new();

        let tick = drain.tick(&mut encoder, &mut muxer, Duration::ZERO).unwrap();
        assert_eq!(tick, DrainTick::Progress);
        assert_eq!(drain.phase(), DrainPhase::Draining);

        drain.expect_end_of_stream();
        assert_eq!(drain.phase(), DrainPhase::AwaitEos);

        encoder.events.push_back(OutputEvent::Sample {
            index: 2,
            sample: EncodedSample::end_of_stream(0),
        });
        let tick = drain.tick(&mut encoder, &mut muxer, Duration::ZERO).unwrap();
        assert_eq!(tick, DrainTick::Finished);
        assert!(drain.is_done());
        assert_eq!(muxer.writer().pts, vec![0, 33_333]);
        assert_eq!(encoder.released, vec![0, 1, 2]);
    }

    #[test]
    fn test_codec_config_buffer_skipped() {
        let mut encoder = ScriptedEncoder::new(vec![
            format_changed(),
            sample(0, 0, SampleFlags::CODEC_CONFIG),
            sample(1, 0, SampleFlags::KEY_FRAME),
        ]);
        let mut muxer = muxer();
        let mut drain = Drain::new();

        drain.tick(&mut encoder, &mut muxer, Duration::ZERO).unwrap();
        assert_eq!(drain.samples_written(), 1);
        assert_eq!(drain.skipped_buffers(), 1);
        assert_eq!(muxer.writer().pts, vec![0]);
    }

    #[test]
    fn test_data_before_format_rejected() {
        let mut encoder = ScriptedEncoder::new(vec![sample(0, 0, SampleFlags::KEY_FRAME)]);
        let mut muxer = muxer();
        let mut drain = Drain::new();

        let err = drain.tick(&mut encoder, &mut muxer, Duration::ZERO).unwrap_err();
        assert!(matches!(err, ShutterError::FormatNegotiation(_)));
        assert!(muxer.writer().pts.is_empty());
        assert_eq!(encoder.released, vec![0]);
    }

    #[test]
    fn test_second_format_change_rejected() {
        let mut encoder = ScriptedEncoder::new(vec![format_changed(), format_changed()]);
        let mut muxer = muxer();
        let mut drain = Drain::new();

        let err = drain.tick(&mut encoder, &mut muxer, Duration::ZERO).unwrap_err();
        assert!(matches!(err, ShutterError::FormatNegotiation(_)));
    }

    #[test]
    fn test_tick_is_bounded() {
        let mut events = vec![format_changed()];
        for i in 0..(MAX_DRAIN_ITERATIONS * 2) {
            events.push(sample(i, i as i64 * 1000, SampleFlags::NONE));
        }
        let mut encoder = ScriptedEncoder::new(events);
        let mut muxer = muxer();
        let mut drain = Drain::new();

        assert_eq!(
            drain.tick(&mut encoder, &mut muxer, Duration::ZERO).unwrap(),
            DrainTick::Progress
        );
        assert_eq!(muxer.samples_written() as usize, MAX_DRAIN_ITERATIONS - 1);
    }

    #[test]
    fn test_idle_when_nothing_ready() {
        let mut encoder = ScriptedEncoder::new(Vec::new());
        let mut muxer = muxer();
        let mut drain = Drain::new();
        assert_eq!(
            drain.tick(&mut encoder, &mut muxer, Duration::ZERO).unwrap(),
            DrainTick::Idle
        );
        assert_eq!(drain.phase(), DrainPhase::AwaitFormat);
    }
}
