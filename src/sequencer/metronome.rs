// Metronome - beat clicks for the external click sink
// The scheduler tracks the next beat boundary in ticks; the sink decides how a click sounds

use super::converter::TimeConverter;
use parking_lot::Mutex;
use std::sync::Arc;

/// Metronome click type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickType {
    /// Click on first beat of bar (accent/downbeat)
    Accent,
    /// Click on other beats
    Regular,
}

/// One metronome beat
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Click {
    /// Score tick of the beat (count-in clicks report the start position)
    pub tick: u64,
    /// Scaled ms of the beat on the score timeline
    pub time_ms: f64,
    pub measure: u32,
    pub beat: u32,
    pub click_type: ClickType,
    /// True for pre-roll clicks
    pub count_in: bool,
}

/// External click consumer
pub trait MetronomeSink: Send {
    fn click(&mut self, click: &Click);
}

impl<F> MetronomeSink for F
where
    F: FnMut(&Click) + Send,
{
    fn click(&mut self, click: &Click) {
        self(click)
    }
}

/// Click sink keeping every click in memory. Cloning shares the buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingMetronome {
    clicks: Arc<Mutex<Vec<Click>>>,
}

impl RecordingMetronome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clicks(&self) -> Vec<Click> {
        self.clicks.lock().clone()
    }

    pub fn take(&self) -> Vec<Click> {
        std::mem::take(&mut *self.clicks.lock())
    }

    pub fn len(&self) -> usize {
        self.clicks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clicks.lock().is_empty()
    }
}

impl MetronomeSink for RecordingMetronome {
    fn click(&mut self, click: &Click) {
        self.clicks.lock().push(*click);
    }
}

/// Metronome output: an optional sink plus an on/off switch
#[derive(Default)]
pub struct Metronome {
    sink: Option<Box<dyn MetronomeSink>>,
    enabled: bool,
}

impl Metronome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the click sink (replaces any previous one)
    pub fn set_sink(&mut self, sink: Box<dyn MetronomeSink>) {
        self.sink = Some(sink);
    }

    pub fn clear_sink(&mut self) {
        self.sink = None;
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Enable/disable metronome
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Check if metronome is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Send a click if enabled
    pub fn trigger_click(&mut self, click: &Click) {
        if !self.enabled {
            return;
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.click(click);
        }
    }
}

impl std::fmt::Debug for Metronome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metronome")
            .field("enabled", &self.enabled)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

/// Metronome scheduler
/// Tracks the next beat boundary on the score timeline
#[derive(Debug, Clone, Default)]
pub struct MetronomeScheduler {
    next_beat: u64,
}

impl MetronomeScheduler {
    /// Create new scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Next beat at or after `tick` (after a seek or a start)
    pub fn reset(&mut self, tick: u64, converter: &TimeConverter) {
        self.next_beat = converter.next_beat_at_or_after(tick);
    }

    /// Tick of the next pending beat
    pub fn next_beat(&self) -> u64 {
        self.next_beat
    }

    /// Pending beat if it lies at or before `tick`
    pub fn due(&self, tick: u64) -> Option<u64> {
        (self.next_beat <= tick).then_some(self.next_beat)
    }

    /// Consume the pending beat and build its click
    pub fn take_beat(&mut self, converter: &TimeConverter) -> Click {
        let tick = self.next_beat;
        let position = converter.tick_to_measure(tick);
        self.next_beat = converter.next_beat_after(tick);
        Click {
            tick,
            time_ms: converter.tick_to_ms(tick),
            measure: position.measure,
            beat: position.beat,
            click_type: click_type_for_beat(position.beat),
            count_in: false,
        }
    }
}

/// Accent on the downbeat
pub fn click_type_for_beat(beat: u32) -> ClickType {
    if beat == 0 {
        ClickType::Accent
    } else {
        ClickType::Regular
    }
}
