// Sequencer module
// Timeline conversion, multi-track score, transport and tick scheduling

pub mod converter;
pub mod cursor;
pub mod driver;
pub mod metronome;
pub mod multitrack;
pub mod notes;
pub mod processor;
#[allow(clippy::module_inception)]
pub mod sequencer;
pub mod tempo;
pub mod timeline;
pub mod track;
pub mod track_state;
pub mod transport;

pub use converter::{TimeConverter, MAX_TICK};
pub use cursor::TrackCursor;
pub use driver::{
    Clock, ManualClock, ManualTickDriver, SystemClock, ThreadTickDriver, TickDriver, TickFlow,
    TickTarget,
};
pub use metronome::{Click, ClickType, Metronome, MetronomeScheduler, MetronomeSink, RecordingMetronome};
pub use multitrack::MultiTrack;
pub use notes::{ActiveNote, NoteTracker};
pub use processor::{Processor, TrackTransform};
pub use sequencer::Sequencer;
pub use tempo::{TempoEntry, TempoMap};
pub use timeline::{MetronomeMode, MusicalTime, TimeSignature, TimeSignatureEntry, TimeSignatureMap};
pub use track::{PortId, Track, TrackId};
pub use track_state::TrackState;
pub use transport::{
    CountIn, PlayMode, RepeatWindow, SharedTransportState, TimeShiftMode, TransportSnapshot,
    TransportState,
};
