// Track processors - per-track event hook run before delivery
// A processor can rewrite an event or drop it (None)

use crate::midi::event::MidiEvent;
use std::fmt;

/// Built-in per-track transformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackTransform {
    /// Semitones added to note numbers; notes pushed outside 0..=127 are dropped
    pub transpose: i8,
    /// Note-on velocity in percent (100 = unchanged)
    pub velocity_scale: u16,
    /// Force every event onto this channel
    pub channel: Option<u8>,
}

impl Default for TrackTransform {
    fn default() -> Self {
        Self {
            transpose: 0,
            velocity_scale: 100,
            channel: None,
        }
    }
}

impl TrackTransform {
    pub fn transpose(semitones: i8) -> Self {
        Self {
            transpose: semitones,
            ..Self::default()
        }
    }

    pub fn rechannel(channel: u8) -> Self {
        Self {
            channel: Some(channel),
            ..Self::default()
        }
    }

    /// Returns true if the transform leaves every event untouched
    pub fn is_identity(&self) -> bool {
        self.transpose == 0 && self.velocity_scale == 100 && self.channel.is_none()
    }

    pub fn apply(&self, event: MidiEvent) -> Option<MidiEvent> {
        let mut event = match event {
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            } => {
                let note = transpose_note(note, self.transpose)?;
                let velocity = if velocity == 0 {
                    0
                } else {
                    // Scaled note-ons stay note-ons
                    (velocity as u32 * self.velocity_scale as u32 / 100).clamp(1, 127) as u8
                };
                MidiEvent::NoteOn {
                    channel,
                    note,
                    velocity,
                }
            }
            MidiEvent::NoteOff { channel, note } => MidiEvent::NoteOff {
                channel,
                note: transpose_note(note, self.transpose)?,
            },
            other => other,
        };
        if let Some(channel) = self.channel {
            event = event.with_channel(channel);
        }
        Some(event)
    }
}

fn transpose_note(note: u8, semitones: i8) -> Option<u8> {
    let shifted = note as i16 + semitones as i16;
    if (0..=127).contains(&shifted) {
        Some(shifted as u8)
    } else {
        None
    }
}

/// User hook: return `None` to drop the event
pub type ProcessorFn = Box<dyn FnMut(&MidiEvent) -> Option<MidiEvent> + Send>;

/// Processing strategy attached to a track
pub enum Processor {
    Transform(TrackTransform),
    Custom(ProcessorFn),
}

impl Processor {
    /// Wrap a closure as a processor
    pub fn custom<F>(f: F) -> Self
    where
        F: FnMut(&MidiEvent) -> Option<MidiEvent> + Send + 'static,
    {
        Processor::Custom(Box::new(f))
    }

    /// Run the hook on one event
    pub fn process(&mut self, event: MidiEvent) -> Option<MidiEvent> {
        match self {
            Processor::Transform(transform) => transform.apply(event),
            Processor::Custom(f) => f(&event),
        }
    }
}

impl From<TrackTransform> for Processor {
    fn from(transform: TrackTransform) -> Self {
        Processor::Transform(transform)
    }
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Processor::Transform(t) => f.debug_tuple("Transform").field(t).finish(),
            Processor::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_on(note: u8, velocity: u8) -> MidiEvent {
        MidiEvent::NoteOn {
            channel: 0,
            note,
            velocity,
        }
    }

    #[test]
    fn test_transpose() {
        let t = TrackTransform::transpose(12);
        assert_eq!(t.apply(note_on(60, 100)), Some(note_on(72, 100)));
        assert_eq!(
            t.apply(MidiEvent::NoteOff {
                channel: 0,
                note: 60
            }),
            Some(MidiEvent::NoteOff {
                channel: 0,
                note: 72
            })
        );
        // Out of range: dropped
        assert_eq!(t.apply(note_on(120, 100)), None);
    }

    #[test]
    fn test_velocity_scale() {
        let t = TrackTransform {
            velocity_scale: 50,
            ..TrackTransform::default()
        };
        assert_eq!(t.apply(note_on(60, 100)), Some(note_on(60, 50)));
        // Never turns a note-on into a note-off
        assert_eq!(t.apply(note_on(60, 1)), Some(note_on(60, 1)));
        assert_eq!(t.apply(note_on(60, 0)), Some(note_on(60, 0)));

        let loud = TrackTransform {
            velocity_scale: 200,
            ..TrackTransform::default()
        };
        assert_eq!(loud.apply(note_on(60, 100)), Some(note_on(60, 127)));
    }

    #[test]
    fn test_rechannel_non_note() {
        let t = TrackTransform::rechannel(9);
        let out = t
            .apply(MidiEvent::ProgramChange {
                channel: 0,
                program: 5,
            })
            .unwrap();
        assert_eq!(out.channel(), 9);
    }

    #[test]
    fn test_custom_processor_drop() {
        let mut p = Processor::custom(|e| if e.is_note_on() { None } else { Some(*e) });
        assert_eq!(p.process(note_on(60, 100)), None);
        assert!(p.process(note_on(60, 0)).is_some());
        assert_eq!(format!("{p:?}"), "Custom(..)");
    }

    #[test]
    fn test_identity() {
        assert!(TrackTransform::default().is_identity());
        assert!(!TrackTransform::transpose(-1).is_identity());
    }
}
