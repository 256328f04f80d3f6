// Track - one event list with its own cursor, output binding and processing
// Tracks are addressed by a stable TrackId, independent of their position in the store

use super::cursor::{shifted_tick, TrackCursor};
use super::processor::Processor;
use super::track_state::TrackState;
use crate::midi::event::TimedEvent;
use std::fmt;

/// Output port identifier (index into the sequencer's sink table)
pub type PortId = u32;

/// Stable track identifier. Survives moves, invalidated by deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A sequencer track
#[derive(Debug)]
pub struct Track {
    id: TrackId,

    /// Display name (informative only)
    pub name: String,

    /// Events sorted by stored tick; equal ticks keep insertion order
    events: Vec<TimedEvent>,

    cursor: TrackCursor,
    /// Fold of `events[..cursor]`
    state: TrackState,
    out_port: PortId,
    processor: Option<Processor>,

    /// Offset in ticks added to every event at read time
    time_shift: i64,

    muted: bool,
    solo: bool,
}

impl Track {
    pub(crate) fn new(id: TrackId) -> Self {
        Self {
            id,
            name: String::new(),
            events: Vec::new(),
            cursor: TrackCursor::new(),
            state: TrackState::new(),
            out_port: 0,
            processor: None,
            time_shift: 0,
            muted: false,
            solo: false,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Insert an event, keeping tick order. The cursor keeps pointing at the
    /// same pending event.
    pub fn add_event(&mut self, event: TimedEvent) {
        if self.insert_event(event) {
            self.rebuild_state();
        }
    }

    pub fn add_events<I: IntoIterator<Item = TimedEvent>>(&mut self, events: I) {
        let mut behind_cursor = false;
        for event in events {
            behind_cursor |= self.insert_event(event);
        }
        if behind_cursor {
            self.rebuild_state();
        }
    }

    /// True if the event landed behind the cursor
    fn insert_event(&mut self, event: TimedEvent) -> bool {
        // After any events already at this tick
        let insert_pos = self.events.partition_point(|e| e.tick <= event.tick);
        self.events.insert(insert_pos, event);
        self.cursor.on_insert(insert_pos);
        insert_pos < self.cursor.position()
    }

    /// Remove the event at `index`
    pub fn remove_event(&mut self, index: usize) -> Option<TimedEvent> {
        if index >= self.events.len() {
            return None;
        }
        let behind_cursor = index < self.cursor.position();
        self.cursor.on_remove(index);
        let removed = self.events.remove(index);
        if behind_cursor {
            self.rebuild_state();
        }
        Some(removed)
    }

    /// Drop every event and rewind
    pub fn clear(&mut self) {
        self.events.clear();
        self.cursor.reset();
        self.state.reset();
    }

    /// Stored tick of the last event
    pub fn last_tick(&self) -> Option<u64> {
        self.events.last().map(|e| e.tick)
    }

    pub fn out_port(&self) -> PortId {
        self.out_port
    }

    pub(crate) fn set_out_port(&mut self, port: PortId) {
        self.out_port = port;
    }

    pub fn processor(&self) -> Option<&Processor> {
        self.processor.as_ref()
    }

    pub(crate) fn processor_mut(&mut self) -> Option<&mut Processor> {
        self.processor.as_mut()
    }

    pub(crate) fn set_processor(&mut self, processor: Option<Processor>) -> Option<Processor> {
        std::mem::replace(&mut self.processor, processor)
    }

    pub fn time_shift(&self) -> i64 {
        self.time_shift
    }

    pub(crate) fn set_time_shift(&mut self, ticks: i64) {
        self.time_shift = ticks;
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub(crate) fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn is_solo(&self) -> bool {
        self.solo
    }

    pub(crate) fn set_solo(&mut self, solo: bool) {
        self.solo = solo;
    }

    pub fn cursor(&self) -> &TrackCursor {
        &self.cursor
    }

    /// Controller snapshot at the cursor
    pub fn state(&self) -> &TrackState {
        &self.state
    }

    fn rebuild_state(&mut self) {
        self.state.reset();
        for event in &self.events[..self.cursor.position()] {
            self.state.observe(&event.event);
        }
    }

    /// Next pending event and its tick under `shift`
    pub(crate) fn peek(&self, shift: i64) -> Option<(u64, &TimedEvent)> {
        self.cursor
            .peek(&self.events)
            .map(|e| (shifted_tick(e.tick, shift), e))
    }

    pub(crate) fn advance(&mut self) {
        if let Some(event) = self.cursor.peek(&self.events) {
            self.state.observe(&event.event);
        }
        self.cursor.advance(&self.events);
    }

    pub(crate) fn seek(&mut self, shift: i64, tick: u64) {
        self.cursor.seek_to_tick(&self.events, shift, tick);
        self.rebuild_state();
    }

    pub(crate) fn resume(&mut self, shift: i64, tick: u64) {
        let before = self.cursor.position();
        self.cursor.resume_at_tick(&self.events, shift, tick);
        if self.cursor.position() != before {
            self.rebuild_state();
        }
    }

    /// Last shifted tick, for end-of-score computation
    pub(crate) fn end_tick(&self, shift: i64) -> Option<u64> {
        self.last_tick().map(|t| shifted_tick(t, shift))
    }
}
