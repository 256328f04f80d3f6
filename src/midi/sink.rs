// Output sinks - where due events go
// Each track is bound to an output port; the sequencer looks up the sink for that port

use crate::midi::event::MidiEvent;
use crate::sequencer::track::{PortId, TrackId};
use parking_lot::Mutex;
use ringbuf::traits::{Producer, Split};
use ringbuf::HeapRb;
use std::sync::Arc;

/// One event handed to an output, with its score position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delivery {
    /// Track the event came from
    pub track: TrackId,
    pub port: PortId,
    /// Shifted tick at which the event was scheduled
    pub tick: u64,
    /// Same position in milliseconds (tempo scale applied)
    pub time_ms: f64,
    pub event: MidiEvent,
}

/// External consumer of due events (synth, MIDI out port, recorder...)
///
/// Called synchronously from the tick thread while the sequencer lock is held:
/// implementations must not block and must not call back into the sequencer.
pub trait EventSink: Send {
    fn deliver(&mut self, delivery: &Delivery);
}

impl<F> EventSink for F
where
    F: FnMut(&Delivery) + Send,
{
    fn deliver(&mut self, delivery: &Delivery) {
        self(delivery)
    }
}

/// Sink that keeps every delivery in memory. Cloning shares the buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything delivered so far
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    /// Delivered events without their metadata
    pub fn events(&self) -> Vec<MidiEvent> {
        self.deliveries.lock().iter().map(|d| d.event).collect()
    }

    /// Drain the buffer
    pub fn take(&self) -> Vec<Delivery> {
        std::mem::take(&mut *self.deliveries.lock())
    }

    pub fn len(&self) -> usize {
        self.deliveries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.lock().is_empty()
    }
}

impl EventSink for RecordingSink {
    fn deliver(&mut self, delivery: &Delivery) {
        self.deliveries.lock().push(*delivery);
    }
}

pub type DeliveryProducer = ringbuf::HeapProd<Delivery>;
pub type DeliveryConsumer = ringbuf::HeapCons<Delivery>;

/// Lock-free hand-off to another thread (e.g. an audio callback)
pub struct RingBufferSink {
    producer: DeliveryProducer,
    dropped: u64,
}

impl RingBufferSink {
    /// Create a sink and the consumer end of its ring buffer
    pub fn with_capacity(capacity: usize) -> (Self, DeliveryConsumer) {
        let rb = HeapRb::<Delivery>::new(capacity);
        let (producer, consumer) = rb.split();
        (
            Self {
                producer,
                dropped: 0,
            },
            consumer,
        )
    }

    /// Number of events lost because the consumer fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl EventSink for RingBufferSink {
    fn deliver(&mut self, delivery: &Delivery) {
        if self.producer.try_push(*delivery).is_err() {
            self.dropped += 1;
            log::warn!(
                "Output buffer full on port {}, event ignored ({} dropped)",
                delivery.port,
                self.dropped
            );
        }
    }
}
