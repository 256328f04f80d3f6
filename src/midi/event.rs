// MIDI event payloads as stored in tracks
// Wire encoding is handled elsewhere: events arrive here already decoded

/// MIDI channel message carried by a track.
///
/// Channels are 0-based (0..=15). A `NoteOn` with velocity 0 is kept as-is;
/// [`MidiEvent::is_note_off`] treats it as a note-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    PitchBend { channel: u8, value: i16 },
}

impl MidiEvent {
    /// Channel the event is addressed to
    pub fn channel(&self) -> u8 {
        match *self {
            MidiEvent::NoteOn { channel, .. }
            | MidiEvent::NoteOff { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::ProgramChange { channel, .. }
            | MidiEvent::PitchBend { channel, .. } => channel,
        }
    }

    /// Same event readdressed to another channel
    pub fn with_channel(self, new_channel: u8) -> Self {
        let channel = new_channel & 0x0F;
        match self {
            MidiEvent::NoteOn { note, velocity, .. } => MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            },
            MidiEvent::NoteOff { note, .. } => MidiEvent::NoteOff { channel, note },
            MidiEvent::ControlChange {
                controller, value, ..
            } => MidiEvent::ControlChange {
                channel,
                controller,
                value,
            },
            MidiEvent::ProgramChange { program, .. } => {
                MidiEvent::ProgramChange { channel, program }
            }
            MidiEvent::PitchBend { value, .. } => MidiEvent::PitchBend { channel, value },
        }
    }

    /// Note number for note messages
    pub fn note(&self) -> Option<u8> {
        match *self {
            MidiEvent::NoteOn { note, .. } | MidiEvent::NoteOff { note, .. } => Some(note),
            _ => None,
        }
    }

    /// True for a NoteOn with non-zero velocity
    pub fn is_note_on(&self) -> bool {
        matches!(self, MidiEvent::NoteOn { velocity, .. } if *velocity > 0)
    }

    /// True for a NoteOff or a NoteOn with velocity 0
    pub fn is_note_off(&self) -> bool {
        matches!(
            self,
            MidiEvent::NoteOff { .. } | MidiEvent::NoteOn { velocity: 0, .. }
        )
    }
}

/// A MIDI event stamped with its position in the score (MIDI clock ticks)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedEvent {
    pub tick: u64,
    pub event: MidiEvent,
}

impl TimedEvent {
    pub fn new(tick: u64, event: MidiEvent) -> Self {
        Self { tick, event }
    }

    /// Convenience constructor for a note-on
    pub fn note_on(tick: u64, channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(
            tick,
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            },
        )
    }

    /// Convenience constructor for a note-off
    pub fn note_off(tick: u64, channel: u8, note: u8) -> Self {
        Self::new(tick, MidiEvent::NoteOff { channel, note })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_off_velocity_zero() {
        let ev = MidiEvent::NoteOn {
            channel: 0,
            note: 64,
            velocity: 0,
        };
        assert!(ev.is_note_off());
        assert!(!ev.is_note_on());
    }

    #[test]
    fn test_with_channel_keeps_payload() {
        let ev = MidiEvent::ControlChange {
            channel: 0,
            controller: 7,
            value: 127,
        };
        match ev.with_channel(9) {
            MidiEvent::ControlChange {
                channel,
                controller,
                value,
            } => {
                assert_eq!(channel, 9);
                assert_eq!(controller, 7);
                assert_eq!(value, 127);
            }
            _ => panic!("Expected ControlChange"),
        }

        // Channel is masked to 4 bits
        assert_eq!(ev.with_channel(0x1F).channel(), 0x0F);
    }

    #[test]
    fn test_note_accessor() {
        assert_eq!(TimedEvent::note_on(0, 0, 60, 100).event.note(), Some(60));
        assert_eq!(
            MidiEvent::PitchBend {
                channel: 0,
                value: 8192
            }
            .note(),
            None
        );
    }
}
