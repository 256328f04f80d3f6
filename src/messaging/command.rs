// Command types - control thread → sequencer
// Every variant maps to one control-surface call on the Sequencer

use crate::sequencer::processor::TrackTransform;
use crate::sequencer::timeline::MetronomeMode;
use crate::sequencer::track::{PortId, TrackId};
use crate::sequencer::transport::{PlayMode, TimeShiftMode};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Pause,
    Play,
    TogglePlay,
    GoToZero,
    GoToTime(u64),
    GoToTimeMs(f64),
    GoToMeasure { measure: u32, beat: u32 },
    SetTempoScale(f64),
    SetRepeatPlay { start: u64, end: u64, enabled: bool },
    SetRepeatPlayMeasures { start: u32, end: u32, enabled: bool },
    SetCountIn { enabled: bool, beats: u32 },
    SetTimeShiftMode(TimeShiftMode),
    SetGlobalTimeShift(i64),
    SetPlayMode(PlayMode),
    SetMetronomeEnabled(bool),
    SetMetronomeMode(MetronomeMode),
    SetTrackOutPort { track: TrackId, port: PortId },
    /// `None` detaches the track's processor
    SetTrackTransform { track: TrackId, transform: Option<TrackTransform> },
    SetTrackTimeShift { track: TrackId, ticks: i64 },
    SetTrackMuted { track: TrackId, muted: bool },
    SetTrackSolo { track: TrackId, solo: bool },
    InsertTrack { position: usize },
    DeleteTrack(TrackId),
    MoveTrack { track: TrackId, to: usize },
}
