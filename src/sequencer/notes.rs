// Sounding notes - remembers delivered note-ons so they can be released
// Used on stop, pause, seeks and track edits so no note is left hanging

use crate::midi::event::MidiEvent;
use crate::sequencer::track::{PortId, TrackId};
use std::collections::HashMap;

/// A note that received a NoteOn and no NoteOff yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActiveNote {
    pub track: TrackId,
    pub port: PortId,
    pub channel: u8,
    pub note: u8,
}

impl ActiveNote {
    /// Matching note-off
    pub fn note_off(&self) -> MidiEvent {
        MidiEvent::NoteOff {
            channel: self.channel,
            note: self.note,
        }
    }
}

/// Tracks active notes (NoteOn sent, waiting for NoteOff)
#[derive(Debug, Clone, Default)]
pub struct NoteTracker {
    /// Number of unmatched note-ons per key
    active_notes: HashMap<ActiveNote, u32>,
}

impl NoteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivered event
    pub fn observe(&mut self, track: TrackId, port: PortId, event: &MidiEvent) {
        let Some(note) = event.note() else {
            return;
        };
        let key = ActiveNote {
            track,
            port,
            channel: event.channel(),
            note,
        };
        if event.is_note_on() {
            *self.active_notes.entry(key).or_insert(0) += 1;
        } else if event.is_note_off() {
            if let Some(count) = self.active_notes.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    self.active_notes.remove(&key);
                }
            }
        }
    }

    /// Forget and return every sounding note, sorted for stable output
    pub fn release_all(&mut self) -> Vec<ActiveNote> {
        let mut notes: Vec<ActiveNote> = self.active_notes.drain().map(|(k, _)| k).collect();
        notes.sort();
        notes
    }

    /// Forget and return the notes sounding on one track
    pub fn release_track(&mut self, track: TrackId) -> Vec<ActiveNote> {
        let mut notes: Vec<ActiveNote> = self
            .active_notes
            .keys()
            .filter(|k| k.track == track)
            .copied()
            .collect();
        for key in &notes {
            self.active_notes.remove(key);
        }
        notes.sort();
        notes
    }

    pub fn len(&self) -> usize {
        self.active_notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active_notes.is_empty()
    }

    /// Whether any note is sounding on `track`
    pub fn track_has_notes(&self, track: TrackId) -> bool {
        self.active_notes.keys().any(|k| k.track == track)
    }

    pub fn is_sounding(&self, track: TrackId, channel: u8, note: u8) -> bool {
        self.active_notes
            .keys()
            .any(|k| k.track == track && k.channel == channel && k.note == note)
    }
}
