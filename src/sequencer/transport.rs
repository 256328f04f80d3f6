// Transport - playback state, repeat window, count-in
// SharedTransportState publishes the position lock-free for reader threads

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Transport state (play/stop/pause)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl TransportState {
    /// Check if transport is playing (count-in included)
    pub fn is_playing(&self) -> bool {
        matches!(self, TransportState::Playing)
    }

    /// Check if transport is paused
    pub fn is_paused(&self) -> bool {
        matches!(self, TransportState::Paused)
    }

    /// Check if transport is stopped or paused
    pub fn is_stopped(&self) -> bool {
        matches!(self, TransportState::Stopped | TransportState::Paused)
    }

    fn as_u8(self) -> u8 {
        match self {
            TransportState::Stopped => 0,
            TransportState::Playing => 1,
            TransportState::Paused => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => TransportState::Playing,
            2 => TransportState::Paused,
            _ => TransportState::Stopped,
        }
    }
}

/// What happens when the score runs out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayMode {
    /// Stop automatically after the last event
    #[default]
    Bounded,
    /// Keep the clock running (beats only) until stopped
    Unbounded,
}

/// How the store-wide time shift combines with per-track shifts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeShiftMode {
    /// Only each track's own shift applies
    #[default]
    PerTrack,
    /// Global shift is added to every track's shift
    Global,
}

/// Loop region [start, end) in ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepeatWindow {
    pub start: u64,
    pub end: u64,
    pub enabled: bool,
}

impl RepeatWindow {
    pub fn new(start: u64, end: u64, enabled: bool) -> Self {
        Self {
            start,
            end,
            enabled,
        }
    }

    /// Check if `tick` lies inside the window
    pub fn contains(&self, tick: u64) -> bool {
        tick >= self.start && tick < self.end
    }

    /// Loop length in ticks
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether looping is in effect
    pub fn is_active(&self) -> bool {
        self.enabled && self.end > self.start
    }
}

/// Pre-roll settings and progress
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CountIn {
    pub enabled: bool,
    /// Length in metronome beats
    pub beats: u32,
    /// Set while the pre-roll is running
    pub pending: bool,
    /// System time at which the pre-roll started
    pub start_ms: f64,
    /// Length of one pre-roll beat
    pub beat_ms: f64,
    /// Clicks already sent
    pub clicks_sent: u32,
}

impl CountIn {
    pub fn new(enabled: bool, beats: u32) -> Self {
        Self {
            enabled,
            beats,
            ..Self::default()
        }
    }

    /// Whether a start from Stopped should pre-roll
    pub fn applies(&self) -> bool {
        self.enabled && self.beats > 0
    }

    /// System time at which the pre-roll ends
    pub fn end_ms(&self) -> f64 {
        self.start_ms + self.beats as f64 * self.beat_ms
    }

    /// System time of pre-roll click `index`
    pub fn click_ms(&self, index: u32) -> f64 {
        self.start_ms + index as f64 * self.beat_ms
    }
}

/// Snapshot of the published transport position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportSnapshot {
    pub state: TransportState,
    pub tick: u64,
    pub time_ms: f64,
    pub measure: u32,
    pub beat: u32,
    pub beat_offset: u64,
    pub count_in_pending: bool,
    pub tempo_scale: f64,
}

/// Shared transport state
/// Thread-safe via atomics for readers outside the tick thread
#[derive(Debug)]
pub struct SharedTransportState {
    state: AtomicU8,
    tick: AtomicU64,
    time_ms_bits: AtomicU64,
    measure: AtomicU32,
    beat: AtomicU32,
    beat_offset: AtomicU64,
    count_in_pending: AtomicBool,
    tempo_scale_bits: AtomicU64,
}

impl SharedTransportState {
    /// Create new shared transport state
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Get current transport state
    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_state(&self, state: TransportState) {
        self.state.store(state.as_u8(), Ordering::Relaxed);
    }

    /// Last processed tick
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    /// Last processed position in scaled ms
    pub fn time_ms(&self) -> f64 {
        f64::from_bits(self.time_ms_bits.load(Ordering::Relaxed))
    }

    pub fn measure(&self) -> u32 {
        self.measure.load(Ordering::Relaxed)
    }

    pub fn beat(&self) -> u32 {
        self.beat.load(Ordering::Relaxed)
    }

    pub fn beat_offset(&self) -> u64 {
        self.beat_offset.load(Ordering::Relaxed)
    }

    pub fn count_in_pending(&self) -> bool {
        self.count_in_pending.load(Ordering::Relaxed)
    }

    pub(crate) fn set_count_in_pending(&self, pending: bool) {
        self.count_in_pending.store(pending, Ordering::Relaxed);
    }

    pub fn tempo_scale(&self) -> f64 {
        f64::from_bits(self.tempo_scale_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn set_tempo_scale(&self, scale: f64) {
        self.tempo_scale_bits.store(scale.to_bits(), Ordering::Relaxed);
    }

    /// Publish a new position
    pub(crate) fn publish_position(
        &self,
        tick: u64,
        time_ms: f64,
        measure: u32,
        beat: u32,
        beat_offset: u64,
    ) {
        self.tick.store(tick, Ordering::Relaxed);
        self.time_ms_bits.store(time_ms.to_bits(), Ordering::Relaxed);
        self.measure.store(measure, Ordering::Relaxed);
        self.beat.store(beat, Ordering::Relaxed);
        self.beat_offset.store(beat_offset, Ordering::Relaxed);
    }

    /// Read every field (not atomic as a whole; may mix two consecutive ticks)
    pub fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            state: self.state(),
            tick: self.tick(),
            time_ms: self.time_ms(),
            measure: self.measure(),
            beat: self.beat(),
            beat_offset: self.beat_offset(),
            count_in_pending: self.count_in_pending(),
            tempo_scale: self.tempo_scale(),
        }
    }
}

impl Default for SharedTransportState {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(TransportState::Stopped.as_u8()),
            tick: AtomicU64::new(0),
            time_ms_bits: AtomicU64::new(0f64.to_bits()),
            measure: AtomicU32::new(0),
            beat: AtomicU32::new(0),
            beat_offset: AtomicU64::new(0),
            count_in_pending: AtomicBool::new(false),
            tempo_scale_bits: AtomicU64::new(1f64.to_bits()),
        }
    }
}
