// Time Converter - ticks <-> milliseconds <-> measures
// Holds the score's tempo and signature maps; the tempo scale is a plain multiplier applied on the fly

use super::tempo::TempoMap;
use super::timeline::{MetronomeMode, MusicalTime, TimeSignature, TimeSignatureMap};
use crate::error::{SequencerError, SequencerResult};

/// Float slack when flooring ms -> tick, so exact boundaries don't fall one tick short
const TICK_EPSILON: f64 = 1e-6;

/// Furthest addressable position. Leaves headroom so beat and shift
/// arithmetic on a position can't overflow.
pub const MAX_TICK: u64 = i64::MAX as u64;

/// Converts between MIDI clock ticks, milliseconds and musical positions
#[derive(Debug, Clone)]
pub struct TimeConverter {
    tempo_map: TempoMap,
    signatures: TimeSignatureMap,
    tempo_scale: f64,
    metronome_mode: MetronomeMode,
}

impl TimeConverter {
    /// Both maps must share the same resolution
    pub fn new(tempo_map: TempoMap, signatures: TimeSignatureMap) -> SequencerResult<Self> {
        if tempo_map.resolution() != signatures.resolution() {
            return Err(SequencerError::Config(format!(
                "Tempo map resolution {} differs from signature map resolution {}",
                tempo_map.resolution(),
                signatures.resolution()
            )));
        }
        Ok(Self {
            tempo_map,
            signatures,
            tempo_scale: 1.0,
            metronome_mode: MetronomeMode::default(),
        })
    }

    /// 120 BPM, 4/4
    pub fn with_defaults(resolution: u32) -> SequencerResult<Self> {
        Self::new(
            TempoMap::new(resolution, Vec::new())?,
            TimeSignatureMap::new(resolution, Vec::new())?,
        )
    }

    pub fn resolution(&self) -> u32 {
        self.tempo_map.resolution()
    }

    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo_map
    }

    pub fn signatures(&self) -> &TimeSignatureMap {
        &self.signatures
    }

    /// Replace the tempo map (resolution must match)
    pub fn set_tempo_map(&mut self, tempo_map: TempoMap) -> SequencerResult<()> {
        if tempo_map.resolution() != self.resolution() {
            return Err(SequencerError::Config(format!(
                "Tempo map resolution {} differs from {}",
                tempo_map.resolution(),
                self.resolution()
            )));
        }
        self.tempo_map = tempo_map;
        Ok(())
    }

    /// Replace the signature map (resolution must match)
    pub fn set_signatures(&mut self, signatures: TimeSignatureMap) -> SequencerResult<()> {
        if signatures.resolution() != self.resolution() {
            return Err(SequencerError::Config(format!(
                "Signature map resolution {} differs from {}",
                signatures.resolution(),
                self.resolution()
            )));
        }
        self.signatures = signatures;
        Ok(())
    }

    pub fn tempo_scale(&self) -> f64 {
        self.tempo_scale
    }

    /// Set the tempo multiplier (2.0 = twice as fast). Must be positive and finite.
    pub fn set_tempo_scale(&mut self, scale: f64) -> SequencerResult<()> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(SequencerError::InvalidTempoScale(scale));
        }
        self.tempo_scale = scale;
        Ok(())
    }

    pub fn metronome_mode(&self) -> MetronomeMode {
        self.metronome_mode
    }

    pub fn set_metronome_mode(&mut self, mode: MetronomeMode) {
        self.metronome_mode = mode;
    }

    /// Scaled milliseconds from tick 0
    pub fn tick_to_ms(&self, tick: u64) -> f64 {
        self.tempo_map.tick_to_ms(tick) / self.tempo_scale
    }

    /// Scaled milliseconds to the tick in force at that time (floored).
    /// Negative times clamp to tick 0, huge ones to [`MAX_TICK`].
    pub fn ms_to_tick(&self, ms: f64) -> u64 {
        let ticks = self.tempo_map.ms_to_ticks(ms * self.tempo_scale);
        ((ticks + TICK_EPSILON).floor().max(0.0) as u64).min(MAX_TICK)
    }

    /// Scaled milliseconds per tick at `tick`
    pub fn ms_per_tick_at(&self, tick: u64) -> f64 {
        self.tempo_map.ms_per_tick_at(tick) / self.tempo_scale
    }

    /// BPM from the tempo map, ignoring the scale
    pub fn tempo_without_scale(&self, tick: u64) -> f64 {
        self.tempo_map.bpm_at(tick)
    }

    /// Effective BPM (tempo map times scale)
    pub fn tempo_with_scale(&self, tick: u64) -> f64 {
        self.tempo_map.bpm_at(tick) * self.tempo_scale
    }

    pub fn measure_to_tick(&self, measure: u32, beat: u32, offset: u64) -> u64 {
        self.signatures
            .measure_to_tick(measure, beat, offset, self.metronome_mode)
    }

    pub fn tick_to_measure(&self, tick: u64) -> MusicalTime {
        self.signatures.tick_to_measure(tick, self.metronome_mode)
    }

    pub fn signature_at(&self, tick: u64) -> TimeSignature {
        self.signatures.signature_at(tick)
    }

    /// Metronome beat length at `tick`
    pub fn beat_ticks_at(&self, tick: u64) -> u64 {
        self.signature_at(tick)
            .beat_ticks(self.resolution(), self.metronome_mode)
    }

    /// First beat boundary at or after `tick`
    pub fn next_beat_at_or_after(&self, tick: u64) -> u64 {
        self.signatures
            .next_beat_at_or_after(tick, self.metronome_mode)
    }

    /// First beat boundary strictly after `tick`
    pub fn next_beat_after(&self, tick: u64) -> u64 {
        self.signatures.next_beat_after(tick, self.metronome_mode)
    }

    /// Scaled duration of `beats` beats starting at `tick`
    pub fn beats_duration_ms(&self, tick: u64, beats: u32) -> f64 {
        let mut ms = 0.0;
        let mut at = tick;
        for _ in 0..beats {
            let next = at.saturating_add(self.beat_ticks_at(at));
            ms += self.tick_to_ms(next) - self.tick_to_ms(at);
            at = next;
        }
        ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::tempo::TempoEntry;
    use crate::sequencer::timeline::TimeSignatureEntry;

    fn converter() -> TimeConverter {
        TimeConverter::new(
            TempoMap::constant(480, 500_000).unwrap(),
            TimeSignatureMap::constant(480, TimeSignature::four_four()).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_tick_to_ms_with_scale() {
        let mut conv = converter();
        assert_eq!(conv.tick_to_ms(480), 500.0);

        conv.set_tempo_scale(2.0).unwrap();
        assert_eq!(conv.tick_to_ms(480), 250.0);
        assert_eq!(conv.tempo_with_scale(0), 240.0);
        assert_eq!(conv.tempo_without_scale(0), 120.0);
    }

    #[test]
    fn test_ms_to_tick() {
        let mut conv = converter();
        assert_eq!(conv.ms_to_tick(500.0), 480);
        assert_eq!(conv.ms_to_tick(-100.0), 0);
        // Floors inside a tick
        assert_eq!(conv.ms_to_tick(1.5), 1);

        conv.set_tempo_scale(0.5).unwrap();
        assert_eq!(conv.ms_to_tick(1000.0), 480);
    }

    #[test]
    fn test_invalid_tempo_scale_keeps_previous() {
        let mut conv = converter();
        conv.set_tempo_scale(1.5).unwrap();
        assert!(conv.set_tempo_scale(0.0).is_err());
        assert!(conv.set_tempo_scale(-1.0).is_err());
        assert!(conv.set_tempo_scale(f64::INFINITY).is_err());
        assert_eq!(conv.tempo_scale(), 1.5);
    }

    #[test]
    fn test_round_trip_across_tempo_changes() {
        let conv = TimeConverter::new(
            TempoMap::new(
                96,
                vec![
                    TempoEntry::new(0, 500_000),
                    TempoEntry::new(384, 750_000),
                    TempoEntry::new(1000, 333_333),
                ],
            )
            .unwrap(),
            TimeSignatureMap::new(96, Vec::new()).unwrap(),
        )
        .unwrap();

        for tick in (0..5000).step_by(7) {
            assert_eq!(conv.ms_to_tick(conv.tick_to_ms(tick)), tick, "tick {tick}");
        }
    }

    #[test]
    fn test_resolution_mismatch() {
        let result = TimeConverter::new(
            TempoMap::constant(480, 500_000).unwrap(),
            TimeSignatureMap::new(96, Vec::new()).unwrap(),
        );
        assert!(matches!(result, Err(SequencerError::Config(_))));
    }

    #[test]
    fn test_beats_duration() {
        let conv = TimeConverter::new(
            TempoMap::constant(480, 500_000).unwrap(),
            TimeSignatureMap::new(
                480,
                vec![TimeSignatureEntry {
                    tick: 0,
                    signature: TimeSignature::new(6, 8).unwrap(),
                }],
            )
            .unwrap(),
        )
        .unwrap();
        // Eighth-note beats at 120 BPM
        assert_eq!(conv.beats_duration_ms(0, 2), 500.0);
    }
}
