// Multi-Track Store - ordered collection of tracks
// Track order decides who goes first when several tracks have events at the same tick

use super::processor::Processor;
use super::track::{PortId, Track, TrackId};
use super::transport::TimeShiftMode;
use crate::error::{SequencerError, SequencerResult};
use crate::midi::event::TimedEvent;

/// Ordered set of tracks plus score-wide shift settings
#[derive(Debug, Default)]
pub struct MultiTrack {
    tracks: Vec<Track>,
    next_id: u32,
    /// End of score set by the loader (may exceed the last event)
    explicit_end: u64,
    global_shift: i64,
    shift_mode: TimeShiftMode,
}

impl MultiTrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Tracks in play order
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        self.tracks.iter().map(|t| t.id()).collect()
    }

    /// Create an empty track at `position` (0..=len)
    pub fn insert_track(&mut self, position: usize) -> SequencerResult<TrackId> {
        if position > self.tracks.len() {
            return Err(SequencerError::InvalidTrackPosition {
                position,
                len: self.tracks.len(),
            });
        }
        let id = TrackId(self.next_id);
        self.next_id += 1;
        self.tracks.insert(position, Track::new(id));
        Ok(id)
    }

    /// Create an empty track after the last one
    pub fn push_track(&mut self) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        self.tracks.push(Track::new(id));
        id
    }

    /// Remove a track; its id becomes invalid
    pub fn delete_track(&mut self, id: TrackId) -> SequencerResult<Track> {
        let index = self.index_of(id).ok_or(SequencerError::UnknownTrack(id))?;
        Ok(self.tracks.remove(index))
    }

    /// Move a track so that it ends up at index `to`
    pub fn move_track(&mut self, id: TrackId, to: usize) -> SequencerResult<()> {
        let from = self.index_of(id).ok_or(SequencerError::UnknownTrack(id))?;
        if to >= self.tracks.len() {
            return Err(SequencerError::InvalidTrackPosition {
                position: to,
                len: self.tracks.len(),
            });
        }
        let track = self.tracks.remove(from);
        self.tracks.insert(to, track);
        Ok(())
    }

    pub fn index_of(&self, id: TrackId) -> Option<usize> {
        self.tracks.iter().position(|t| t.id() == id)
    }

    pub fn get_track(&self, id: TrackId) -> SequencerResult<&Track> {
        self.tracks
            .iter()
            .find(|t| t.id() == id)
            .ok_or(SequencerError::UnknownTrack(id))
    }

    pub fn get_track_mut(&mut self, id: TrackId) -> SequencerResult<&mut Track> {
        self.tracks
            .iter_mut()
            .find(|t| t.id() == id)
            .ok_or(SequencerError::UnknownTrack(id))
    }

    pub fn track_at(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub(crate) fn track_at_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.tracks.get_mut(index)
    }

    /// Append events to a track
    pub fn add_events<I>(&mut self, id: TrackId, events: I) -> SequencerResult<()>
    where
        I: IntoIterator<Item = TimedEvent>,
    {
        self.get_track_mut(id)?.add_events(events);
        Ok(())
    }

    pub fn time_shift_mode(&self) -> TimeShiftMode {
        self.shift_mode
    }

    pub fn set_time_shift_mode(&mut self, mode: TimeShiftMode) {
        self.shift_mode = mode;
    }

    pub fn global_time_shift(&self) -> i64 {
        self.global_shift
    }

    pub fn set_global_time_shift(&mut self, ticks: i64) {
        self.global_shift = ticks;
    }

    /// Shift applied to `track` at read time.
    /// Global mode adds the global shift to the track's own.
    pub fn effective_shift(&self, track: &Track) -> i64 {
        match self.shift_mode {
            TimeShiftMode::PerTrack => track.time_shift(),
            TimeShiftMode::Global => track.time_shift().saturating_add(self.global_shift),
        }
    }

    pub fn track_out_port(&self, id: TrackId) -> SequencerResult<PortId> {
        Ok(self.get_track(id)?.out_port())
    }

    pub fn set_track_out_port(&mut self, id: TrackId, port: PortId) -> SequencerResult<()> {
        self.get_track_mut(id)?.set_out_port(port);
        Ok(())
    }

    /// Attach (or detach with `None`) a processor, returning the previous one
    pub fn set_track_processor(
        &mut self,
        id: TrackId,
        processor: Option<Processor>,
    ) -> SequencerResult<Option<Processor>> {
        Ok(self.get_track_mut(id)?.set_processor(processor))
    }

    pub fn track_time_shift(&self, id: TrackId) -> SequencerResult<i64> {
        Ok(self.get_track(id)?.time_shift())
    }

    pub fn set_track_time_shift(&mut self, id: TrackId, ticks: i64) -> SequencerResult<()> {
        self.get_track_mut(id)?.set_time_shift(ticks);
        Ok(())
    }

    pub fn set_track_muted(&mut self, id: TrackId, muted: bool) -> SequencerResult<()> {
        self.get_track_mut(id)?.set_muted(muted);
        Ok(())
    }

    pub fn set_track_solo(&mut self, id: TrackId, solo: bool) -> SequencerResult<()> {
        self.get_track_mut(id)?.set_solo(solo);
        Ok(())
    }

    pub fn any_solo(&self) -> bool {
        self.tracks.iter().any(|t| t.is_solo())
    }

    /// Whether the track at `index` delivers events (mute and solo applied)
    pub fn is_audible(&self, index: usize) -> bool {
        let Some(track) = self.tracks.get(index) else {
            return false;
        };
        !track.is_muted() && (track.is_solo() || !self.any_solo())
    }

    /// Set the loader's end of score
    pub fn set_end_time(&mut self, tick: u64) {
        self.explicit_end = tick;
    }

    /// End of score: the later of the explicit end and the last shifted event
    pub fn end_time(&self) -> u64 {
        self.tracks
            .iter()
            .filter_map(|t| t.end_tick(self.effective_shift(t)))
            .fold(self.explicit_end, u64::max)
    }

    /// Reposition every cursor to the first event at or after `tick`
    pub fn seek_all(&mut self, tick: u64) {
        for index in 0..self.tracks.len() {
            let shift = self.effective_shift(&self.tracks[index]);
            self.tracks[index].seek(shift, tick);
        }
    }

    /// Reposition one cursor
    pub(crate) fn seek_track(&mut self, index: usize, tick: u64) {
        if let Some(track) = self.tracks.get(index) {
            let shift = self.effective_shift(track);
            self.tracks[index].seek(shift, tick);
        }
    }

    /// Reposition one cursor at a partly processed `tick`
    pub(crate) fn resume_track(&mut self, index: usize, tick: u64) {
        if let Some(track) = self.tracks.get(index) {
            let shift = self.effective_shift(track);
            self.tracks[index].resume(shift, tick);
        }
    }

    pub(crate) fn resume_all(&mut self, tick: u64) {
        for index in 0..self.tracks.len() {
            self.resume_track(index, tick);
        }
    }

    /// Earliest pending event over all tracks as (track index, shifted tick).
    /// Ties go to the track that comes first.
    pub fn next_due(&self) -> Option<(usize, u64)> {
        let mut best: Option<(usize, u64)> = None;
        for (index, track) in self.tracks.iter().enumerate() {
            if let Some((tick, _)) = track.peek(self.effective_shift(track)) {
                match best {
                    Some((_, best_tick)) if best_tick <= tick => {}
                    _ => best = Some((index, tick)),
                }
            }
        }
        best
    }

    /// Earliest pending event without touching any cursor
    pub fn peek_next(&self) -> Option<(TrackId, u64, TimedEvent)> {
        let (index, tick) = self.next_due()?;
        let track = &self.tracks[index];
        let (_, event) = track.peek(self.effective_shift(track))?;
        Some((track.id(), tick, *event))
    }

    /// Consume the pending event of the track at `index`
    pub(crate) fn advance_track(&mut self, index: usize) {
        if let Some(track) = self.tracks.get_mut(index) {
            track.advance();
        }
    }

    /// Remove every track
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.explicit_end = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_two_tracks() -> (MultiTrack, TrackId, TrackId) {
        let mut store = MultiTrack::new();
        let a = store.push_track();
        let b = store.push_track();
        store
            .add_events(a, [TimedEvent::note_on(100, 0, 60, 100)])
            .unwrap();
        store
            .add_events(b, [TimedEvent::note_on(100, 1, 64, 100)])
            .unwrap();
        (store, a, b)
    }

    #[test]
    fn test_insert_and_positions() {
        let mut store = MultiTrack::new();
        let a = store.insert_track(0).unwrap();
        let b = store.insert_track(0).unwrap();
        assert_eq!(store.track_ids(), vec![b, a]);
        assert_eq!(store.num_tracks(), 2);

        let err = store.insert_track(5).unwrap_err();
        assert!(matches!(
            err,
            SequencerError::InvalidTrackPosition {
                position: 5,
                len: 2
            }
        ));
    }

    #[test]
    fn test_ids_stable_across_moves() {
        let mut store = MultiTrack::new();
        let a = store.push_track();
        let b = store.push_track();
        let c = store.push_track();

        store.move_track(a, 2).unwrap();
        assert_eq!(store.track_ids(), vec![b, c, a]);
        store.move_track(a, 0).unwrap();
        assert_eq!(store.track_ids(), vec![a, b, c]);

        assert!(store.move_track(a, 3).is_err());
    }

    #[test]
    fn test_delete_invalidates_id() {
        let mut store = MultiTrack::new();
        let a = store.push_track();
        let b = store.push_track();
        store.delete_track(a).unwrap();

        assert_eq!(store.num_tracks(), 1);
        assert!(matches!(
            store.get_track(a),
            Err(SequencerError::UnknownTrack(id)) if id == a
        ));
        assert!(store.set_track_out_port(a, 1).is_err());
        // New tracks never reuse a deleted id
        let c = store.push_track();
        assert_ne!(c, a);
        assert!(store.get_track(b).is_ok());
    }

    #[test]
    fn test_tie_break_by_track_order() {
        let (mut store, a, b) = store_with_two_tracks();
        assert_eq!(store.peek_next().map(|(id, tick, _)| (id, tick)), Some((a, 100)));

        store.move_track(b, 0).unwrap();
        assert_eq!(store.peek_next().map(|(id, _, _)| id), Some(b));
    }

    #[test]
    fn test_shift_modes() {
        let (mut store, a, _) = store_with_two_tracks();
        store.set_track_time_shift(a, 10).unwrap();
        store.set_global_time_shift(5);

        let track = store.get_track(a).unwrap();
        assert_eq!(store.effective_shift(track), 10);

        store.set_time_shift_mode(TimeShiftMode::Global);
        let track = store.get_track(a).unwrap();
        assert_eq!(store.effective_shift(track), 15);
        assert_eq!(store.end_time(), 115);
    }

    #[test]
    fn test_end_time() {
        let (mut store, _, _) = store_with_two_tracks();
        assert_eq!(store.end_time(), 100);
        store.set_end_time(1920);
        assert_eq!(store.end_time(), 1920);
    }

    #[test]
    fn test_mute_and_solo() {
        let (mut store, a, b) = store_with_two_tracks();
        assert!(store.is_audible(0));
        store.set_track_muted(a, true).unwrap();
        assert!(!store.is_audible(0));

        store.set_track_muted(a, false).unwrap();
        store.set_track_solo(b, true).unwrap();
        assert!(!store.is_audible(0));
        assert!(store.is_audible(1));

        store.set_track_solo(b, false).unwrap();
        assert!(store.is_audible(0));
    }

    #[test]
    fn test_seek_all() {
        let (mut store, a, _) = store_with_two_tracks();
        store.seek_all(101);
        assert!(store.peek_next().is_none());
        store.seek_all(0);
        assert_eq!(store.peek_next().map(|(id, _, _)| id), Some(a));
    }
}
