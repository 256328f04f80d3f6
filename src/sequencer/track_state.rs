// Track State - controller snapshot of a track at the playback position
// Always the fold of the events the cursor has moved past; changing it sends nothing

use crate::midi::event::MidiEvent;

/// First channel mode controller (all sound off, reset, all notes off...).
/// Those are commands rather than settings and are not tracked.
pub const CHANNEL_MODE_CONTROLLER: u8 = 120;

const TRACKED_CONTROLLERS: usize = CHANNEL_MODE_CONTROLLER as usize;

/// Program, pitch bend and controller values a track has set so far.
///
/// Covers the stored events, before any processor runs, and follows muted
/// tracks too, so unmuting or jumping can bring a device up to date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackState {
    /// Last program change
    pub program: Option<u8>,
    /// Last pitch bend, 0 is centre
    pub pitch_bend: i16,
    controllers: [Option<u8>; TRACKED_CONTROLLERS],
}

impl Default for TrackState {
    fn default() -> Self {
        Self {
            program: None,
            pitch_bend: 0,
            controllers: [None; TRACKED_CONTROLLERS],
        }
    }
}

impl TrackState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fold one event into the state
    pub fn observe(&mut self, event: &MidiEvent) {
        match *event {
            MidiEvent::ProgramChange { program, .. } => self.program = Some(program),
            MidiEvent::PitchBend { value, .. } => self.pitch_bend = value,
            MidiEvent::ControlChange {
                controller, value, ..
            } => {
                if let Some(slot) = self.controllers.get_mut(controller as usize) {
                    *slot = Some(value);
                }
            }
            MidiEvent::NoteOn { .. } | MidiEvent::NoteOff { .. } => {}
        }
    }

    /// Last value of `controller`, `None` if never set (or a channel mode controller)
    pub fn controller(&self, controller: u8) -> Option<u8> {
        self.controllers.get(controller as usize).copied().flatten()
    }

    /// Every controller set so far, as (controller, value)
    pub fn controllers(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.controllers
            .iter()
            .enumerate()
            .filter_map(|(cc, value)| value.map(|v| (cc as u8, v)))
    }

    /// Messages that put a device on `channel` into this state: program first,
    /// then controllers, then pitch bend if off centre
    pub fn to_events(&self, channel: u8) -> Vec<MidiEvent> {
        let channel = channel & 0x0F;
        let mut events = Vec::new();
        if let Some(program) = self.program {
            events.push(MidiEvent::ProgramChange { channel, program });
        }
        events.extend(
            self.controllers()
                .map(|(controller, value)| MidiEvent::ControlChange {
                    channel,
                    controller,
                    value,
                }),
        );
        if self.pitch_bend != 0 {
            events.push(MidiEvent::PitchBend {
                channel,
                value: self.pitch_bend,
            });
        }
        events
    }
}
