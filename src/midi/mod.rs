// MIDI payloads and output sinks

pub mod event;
pub mod sink;

pub use event::{MidiEvent, TimedEvent};
pub use sink::{Delivery, EventSink, RecordingSink, RingBufferSink};
