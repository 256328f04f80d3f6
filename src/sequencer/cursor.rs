// Track Cursor - per-track playback pointer
// Moves forward one event at a time; seeks reposition it with a binary search

use crate::midi::event::TimedEvent;

/// Stored tick plus a time shift, clamped at tick 0
#[inline]
pub fn shifted_tick(tick: u64, shift: i64) -> u64 {
    if shift >= 0 {
        tick.saturating_add(shift as u64)
    } else {
        tick.saturating_sub(shift.unsigned_abs())
    }
}

/// Index of the next unconsumed event in a track's event list.
///
/// The cursor does not own the events; every call takes the slice and the
/// effective time shift, so stored ticks are never rewritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackCursor {
    position: usize,
}

impl TrackCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Next unconsumed event, without advancing
    pub fn peek<'a>(&self, events: &'a [TimedEvent]) -> Option<&'a TimedEvent> {
        events.get(self.position)
    }

    /// Shifted tick of the next unconsumed event
    pub fn peek_tick(&self, events: &[TimedEvent], shift: i64) -> Option<u64> {
        self.peek(events).map(|e| shifted_tick(e.tick, shift))
    }

    /// Move past the current event
    pub fn advance(&mut self, events: &[TimedEvent]) {
        if self.position < events.len() {
            self.position += 1;
        }
    }

    /// Point at the first event whose shifted tick is >= `tick`
    pub fn seek_to_tick(&mut self, events: &[TimedEvent], shift: i64, tick: u64) {
        // Shifting (with clamping) keeps the list sorted, so partition_point applies
        self.position = events.partition_point(|e| shifted_tick(e.tick, shift) < tick);
    }

    /// Like [`TrackCursor::seek_to_tick`], except that events at exactly
    /// `tick` the cursor already moved past stay consumed
    pub fn resume_at_tick(&mut self, events: &[TimedEvent], shift: i64, tick: u64) {
        let first = events.partition_point(|e| shifted_tick(e.tick, shift) < tick);
        let past = events.partition_point(|e| shifted_tick(e.tick, shift) <= tick);
        self.position = self.position.clamp(first, past);
    }

    /// Back to the first event
    pub fn reset(&mut self) {
        self.position = 0;
    }

    pub fn is_finished(&self, events: &[TimedEvent]) -> bool {
        self.position >= events.len()
    }

    /// Keep pointing at the same event after one was inserted at `index`
    pub(crate) fn on_insert(&mut self, index: usize) {
        if index < self.position {
            self.position += 1;
        }
    }

    /// Keep pointing at the same event after the one at `index` was removed
    pub(crate) fn on_remove(&mut self, index: usize) {
        if index < self.position {
            self.position -= 1;
        }
    }
}
