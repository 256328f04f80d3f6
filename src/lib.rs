// MyMusic Sequencer - Library exports for tests and benchmarks

pub mod config;
pub mod error;
pub mod messaging;
pub mod midi;
pub mod sequencer;

// Re-export commonly used types for convenience
pub use config::SequencerConfig;
pub use error::{SequencerError, SequencerResult};
pub use messaging::channels::{create_command_channel, create_notification_channel};
pub use messaging::{Command, Notification, NotificationKind};
pub use midi::{Delivery, EventSink, MidiEvent, RecordingSink, RingBufferSink, TimedEvent};
pub use sequencer::{
    ClickType, Metronome, MetronomeMode, MultiTrack, MusicalTime, PlayMode, Processor, Sequencer,
    TempoMap, TimeConverter, TimeShiftMode, TimeSignature, TimeSignatureMap, TrackId,
    TrackState, TrackTransform, TransportState,
};
