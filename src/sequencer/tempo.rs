// Tempo Map - piecewise constant tempo over MIDI clock ticks
// Segments are precomputed in cumulative milliseconds so both conversion directions are a binary search

use crate::error::{SequencerError, SequencerResult};

/// Default MIDI tempo: 120 BPM
pub const DEFAULT_USEC_PER_BEAT: u32 = 500_000;

/// Tempo in force from `tick` on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoEntry {
    pub tick: u64,
    pub usec_per_beat: u32,
}

impl TempoEntry {
    pub fn new(tick: u64, usec_per_beat: u32) -> Self {
        Self {
            tick,
            usec_per_beat,
        }
    }

    /// Entry from a BPM value (rounded to the nearest microsecond)
    pub fn from_bpm(tick: u64, bpm: f64) -> SequencerResult<Self> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(SequencerError::InvalidTempo {
                tick,
                usec_per_beat: 0,
            });
        }
        let usec = (60_000_000.0 / bpm).round();
        if usec < 1.0 || usec > u32::MAX as f64 {
            return Err(SequencerError::InvalidTempo {
                tick,
                usec_per_beat: 0,
            });
        }
        Ok(Self::new(tick, usec as u32))
    }
}

#[derive(Debug, Clone, Copy)]
struct TempoSegment {
    tick: u64,
    usec_per_beat: u32,
    start_ms: f64, // unscaled ms at `tick`
    ms_per_tick: f64,
}

impl TempoSegment {
    /// Unscaled length of `ticks` ticks at this tempo
    fn span_ms(&self, ticks: u64, divisor: f64) -> f64 {
        ticks as f64 * self.usec_per_beat as f64 / divisor
    }
}

/// Tempo map for one score, unscaled.
///
/// The last entry's rate extends indefinitely. Tempo scaling is applied by
/// [`TimeConverter`](super::converter::TimeConverter) at conversion time.
#[derive(Debug, Clone)]
pub struct TempoMap {
    resolution: u32,
    segments: Vec<TempoSegment>,
}

impl TempoMap {
    /// Build the map from loader entries.
    ///
    /// Entries are sorted by tick (stable, last one at a tick wins) and the
    /// first entry is moved to tick 0. An empty list means 120 BPM throughout.
    pub fn new(resolution: u32, mut entries: Vec<TempoEntry>) -> SequencerResult<Self> {
        if resolution == 0 {
            return Err(SequencerError::InvalidResolution);
        }
        if let Some(bad) = entries.iter().find(|e| e.usec_per_beat == 0) {
            return Err(SequencerError::InvalidTempo {
                tick: bad.tick,
                usec_per_beat: bad.usec_per_beat,
            });
        }

        entries.sort_by_key(|e| e.tick);
        entries.dedup_by(|later, earlier| {
            if later.tick == earlier.tick {
                earlier.usec_per_beat = later.usec_per_beat;
                true
            } else {
                false
            }
        });
        if entries.is_empty() {
            entries.push(TempoEntry::new(0, DEFAULT_USEC_PER_BEAT));
        }
        entries[0].tick = 0;

        let ticks_per_ms_divisor = resolution as f64 * 1000.0;
        let mut segments: Vec<TempoSegment> = Vec::with_capacity(entries.len());
        for entry in entries {
            let start_ms = match segments.last() {
                Some(prev) => prev.start_ms + prev.span_ms(entry.tick - prev.tick, ticks_per_ms_divisor),
                None => 0.0,
            };
            segments.push(TempoSegment {
                tick: entry.tick,
                usec_per_beat: entry.usec_per_beat,
                start_ms,
                ms_per_tick: entry.usec_per_beat as f64 / ticks_per_ms_divisor,
            });
        }

        Ok(Self {
            resolution,
            segments,
        })
    }

    /// Single tempo for the whole score
    pub fn constant(resolution: u32, usec_per_beat: u32) -> SequencerResult<Self> {
        Self::new(resolution, vec![TempoEntry::new(0, usec_per_beat)])
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn entries(&self) -> Vec<TempoEntry> {
        self.segments
            .iter()
            .map(|s| TempoEntry::new(s.tick, s.usec_per_beat))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    fn divisor(&self) -> f64 {
        self.resolution as f64 * 1000.0
    }

    fn segment_at_tick(&self, tick: u64) -> &TempoSegment {
        let idx = self.segments.partition_point(|s| s.tick <= tick);
        &self.segments[idx.saturating_sub(1)]
    }

    fn segment_at_ms(&self, ms: f64) -> &TempoSegment {
        let idx = self.segments.partition_point(|s| s.start_ms <= ms);
        &self.segments[idx.saturating_sub(1)]
    }

    /// Microseconds per quarter note at `tick`
    pub fn usec_per_beat_at(&self, tick: u64) -> u32 {
        self.segment_at_tick(tick).usec_per_beat
    }

    /// Unscaled BPM at `tick`
    pub fn bpm_at(&self, tick: u64) -> f64 {
        60_000_000.0 / self.usec_per_beat_at(tick) as f64
    }

    /// Unscaled milliseconds per tick at `tick`
    pub fn ms_per_tick_at(&self, tick: u64) -> f64 {
        self.segment_at_tick(tick).ms_per_tick
    }

    /// Unscaled milliseconds from tick 0 to `tick`
    pub fn tick_to_ms(&self, tick: u64) -> f64 {
        let seg = self.segment_at_tick(tick);
        seg.start_ms + seg.span_ms(tick - seg.tick, self.divisor())
    }

    /// Unscaled milliseconds to fractional ticks; negative input clamps to 0
    pub fn ms_to_ticks(&self, ms: f64) -> f64 {
        if !(ms > 0.0) {
            return 0.0;
        }
        let seg = self.segment_at_ms(ms);
        seg.tick as f64 + (ms - seg.start_ms) * self.divisor() / seg.usec_per_beat as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_tempo() {
        let tm = TempoMap::constant(480, 500_000).unwrap();

        // 120 BPM: one quarter = 500 ms
        assert_eq!(tm.tick_to_ms(480), 500.0);
        assert_eq!(tm.tick_to_ms(0), 0.0);
        assert!((tm.ms_to_ticks(250.0) - 240.0).abs() < 1e-9);
        assert_eq!(tm.bpm_at(10_000), 120.0);
    }

    #[test]
    fn test_tempo_change() {
        // 120 BPM for one beat, then 60 BPM
        let tm = TempoMap::new(
            480,
            vec![TempoEntry::new(0, 500_000), TempoEntry::new(480, 1_000_000)],
        )
        .unwrap();

        assert_eq!(tm.tick_to_ms(480), 500.0);
        assert_eq!(tm.tick_to_ms(960), 1500.0);
        // Extrapolated past the last entry
        assert_eq!(tm.tick_to_ms(1440), 2500.0);
        assert!((tm.ms_to_ticks(1000.0) - 720.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_tempo_rejected() {
        let err = TempoMap::new(480, vec![TempoEntry::new(960, 0)]).unwrap_err();
        match err {
            SequencerError::InvalidTempo { tick, .. } => assert_eq!(tick, 960),
            other => panic!("Expected InvalidTempo, got {other:?}"),
        }
        assert!(TempoEntry::from_bpm(0, 0.0).is_err());
        assert!(TempoEntry::from_bpm(0, -10.0).is_err());
    }

    #[test]
    fn test_unsorted_entries_and_first_at_zero() {
        let tm = TempoMap::new(
            96,
            vec![TempoEntry::new(960, 400_000), TempoEntry::new(10, 600_000)],
        )
        .unwrap();
        let entries = tm.entries();
        assert_eq!(entries[0], TempoEntry::new(0, 600_000));
        assert_eq!(entries[1], TempoEntry::new(960, 400_000));
    }

    #[test]
    fn test_negative_ms_clamps() {
        let tm = TempoMap::constant(480, 500_000).unwrap();
        assert_eq!(tm.ms_to_ticks(-5.0), 0.0);
        assert_eq!(tm.ms_to_ticks(f64::NAN), 0.0);
    }

    #[test]
    fn test_from_bpm() {
        assert_eq!(
            TempoEntry::from_bpm(0, 120.0).unwrap().usec_per_beat,
            500_000
        );
    }
}
