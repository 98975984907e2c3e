//! Recording state machine
//!
//! ```text
//!           prepare          start            pause
//!   Idle ----------> Prepared -------> Recording <------> Paused
//!    ^                                     |      resume     |
//!    |                                     | stop            | stop
//!    |                                     v                 |
//!    +------------- release ------------ Stopped <-----------+
//! ```
//!
//! `release` is accepted from every state and always returns to `Idle`.

use std::fmt;

use serde::Serialize;

/// Lifecycle state of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    /// No recorder allocated
    #[default]
    Idle,
    /// Recorder configured, capture target available
    Prepared,
    /// Frames are being encoded
    Recording,
    /// Frames are dropped; the duration clock is frozen
    Paused,
    /// Output finalized
    Stopped,
}

impl RecordState {
    /// The state `op` leads to, or why it is not allowed
    pub fn apply(self, op: RecordOp) -> Result<RecordState, TransitionRejected> {
        use RecordOp::*;
        use RecordState::*;

        match (self, op) {
            (Idle, Prepare) => Ok(Prepared),
            (Prepared, Start) => Ok(Recording),
            (Recording, Pause) => Ok(Paused),
            (Paused, Resume) => Ok(Recording),
            (Recording | Paused, Stop) => Ok(Stopped),
            (_, Release) => Ok(Idle),
            (from, op) => Err(TransitionRejected::Invalid { from, op }),
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Prepared => "prepared",
            Self::Recording => "recording",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Operations a caller can request of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordOp {
    Prepare,
    Start,
    Pause,
    Resume,
    Stop,
    Release,
}

impl fmt::Display for RecordOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Prepare => "prepare",
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Release => "release",
        };
        write!(f, "{}", name)
    }
}

/// A requested operation that was not carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRejected {
    /// The operation is not valid from the current state
    Invalid {
        /// State at the time of the request
        from: RecordState,
        /// Requested operation
        op: RecordOp,
    },
    /// The recorder does not support the operation
    Unsupported {
        /// Requested operation
        op: RecordOp,
    },
}

impl TransitionRejected {
    /// The rejected operation
    pub fn op(&self) -> RecordOp {
        match self {
            Self::Invalid { op, .. } | Self::Unsupported { op } => *op,
        }
    }
}

impl fmt::Display for TransitionRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid { from, op } => write!(f, "cannot {} while {}", op, from),
            Self::Unsupported { op } => write!(f, "recorder does not support {}", op),
        }
    }
}

impl std::error::Error for TransitionRejected {}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [RecordState; 5] = [
        RecordState::Idle,
        RecordState::Prepared,
        RecordState::Recording,
        RecordState::Paused,
        RecordState::Stopped,
    ];

    #[test]
    fn test_happy_path() {
        let state = RecordState::Idle
            .apply(RecordOp::Prepare)
            .and_then(|s| s.apply(RecordOp::Start))
            .and_then(|s| s.apply(RecordOp::Pause))
            .and_then(|s| s.apply(RecordOp::Resume))
            .and_then(|s| s.apply(RecordOp::Stop))
            .unwrap();
        assert_eq!(state, RecordState::Stopped);
    }

    #[test]
    fn test_release_from_anywhere() {
        for state in ALL_STATES {
            assert_eq!(state.apply(RecordOp::Release), Ok(RecordState::Idle));
        }
    }

    #[test]
    fn test_start_requires_prepare() {
        assert_eq!(
            RecordState::Idle.apply(RecordOp::Start),
            Err(TransitionRejected::Invalid {
                from: RecordState::Idle,
                op: RecordOp::Start
            })
        );
    }

    #[test]
    fn test_pause_only_while_recording() {
        for state in ALL_STATES {
            let result = state.apply(RecordOp::Pause);
            assert_eq!(result.is_ok(), state == RecordState::Recording, "{}", state);
        }
    }

    #[test]
    fn test_stop_only_while_active() {
        assert!(RecordState::Prepared.apply(RecordOp::Stop).is_err());
        assert!(RecordState::Stopped.apply(RecordOp::Stop).is_err());
        assert!(RecordState::Paused.apply(RecordOp::Stop).is_ok());
    }

    #[test]
    fn test_rejection_message() {
        let rejected = RecordState::Idle.apply(RecordOp::Pause).unwrap_err();
        assert_eq!(rejected.to_string(), "cannot pause while idle");
        assert_eq!(rejected.op(), RecordOp::Pause);
    }
}
