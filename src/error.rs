// Sequencer errors
// Every failure is local and recoverable: the operation that failed leaves the previous state untouched

use crate::sequencer::track::TrackId;
use thiserror::Error;

/// Errors returned by the sequencing engine
#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("Unknown track: {0}")]
    UnknownTrack(TrackId),

    #[error("Invalid track position {position} (store holds {len} tracks)")]
    InvalidTrackPosition { position: usize, len: usize },

    #[error("Invalid tempo at tick {tick}: {usec_per_beat} usec per beat")]
    InvalidTempo { tick: u64, usec_per_beat: u32 },

    #[error("Invalid tempo scale: {0}")]
    InvalidTempoScale(f64),

    #[error("Invalid time signature {numerator}/{denominator}")]
    InvalidTimeSignature { numerator: u8, denominator: u8 },

    #[error("Clock resolution must be greater than zero")]
    InvalidResolution,

    #[error("Seek target {target} is beyond the end of the score ({end})")]
    InvalidSeekTarget { target: u64, end: u64 },

    #[error("Invalid repeat window [{start}, {end})")]
    InvalidRepeatWindow { start: u64, end: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SequencerResult<T> = Result<T, SequencerError>;
