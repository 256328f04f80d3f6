// Timeline - Musical time representation
// Time signatures, measure/beat positions and the time-signature map

use crate::error::{SequencerError, SequencerResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Time signature (numerator/denominator)
/// Example: 4/4 time = TimeSignature { numerator: 4, denominator: 4 }
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: u8,   // Symbolic beats per measure
    pub denominator: u8, // Note value (4 = quarter note, 8 = eighth note)
}

impl TimeSignature {
    /// Creates a new time signature, rejecting a zero numerator or a
    /// denominator that is not a power of two
    pub fn new(numerator: u8, denominator: u8) -> SequencerResult<Self> {
        if numerator == 0 || denominator == 0 || !denominator.is_power_of_two() {
            return Err(SequencerError::InvalidTimeSignature {
                numerator,
                denominator,
            });
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    /// Common 4/4 time signature
    pub fn four_four() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }

    /// Length of a measure in ticks
    pub fn ticks_per_measure(&self, resolution: u32) -> u64 {
        (resolution as u64 * 4 * self.numerator as u64 / self.denominator as u64).max(1)
    }

    /// Length of a metronome beat in ticks
    pub fn beat_ticks(&self, resolution: u32, mode: MetronomeMode) -> u64 {
        let mut ticks = resolution as u64 * 4 / self.denominator as u64;
        if mode == MetronomeMode::FollowTheoretic && self.is_compound() {
            ticks *= 3;
        }
        ticks.max(1)
    }

    /// Number of metronome beats in one measure
    pub fn beats_per_measure(&self, resolution: u32, mode: MetronomeMode) -> u64 {
        (self.ticks_per_measure(resolution) / self.beat_ticks(resolution, mode)).max(1)
    }

    /// 6/8, 9/8, 12/8... (but not 3/x)
    pub fn is_compound(&self) -> bool {
        self.numerator % 3 == 0 && self.numerator != 3
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::four_four()
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// How the metronome beat is derived from the time signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetronomeMode {
    /// One click per denominator note value (6/8 clicks six times)
    #[default]
    FollowDenominator,
    /// Compound meters click on the dotted beat (6/8 clicks twice)
    FollowTheoretic,
}

/// Position as measure, beat and tick offset inside the beat (all 0-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct MusicalTime {
    pub measure: u32,
    pub beat: u32,
    pub offset: u64,
}

impl MusicalTime {
    pub fn new(measure: u32, beat: u32, offset: u64) -> Self {
        Self {
            measure,
            beat,
            offset,
        }
    }
}

impl fmt::Display for MusicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}:{:03}", self.measure, self.beat, self.offset)
    }
}

/// Time signature in force from `tick` on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignatureEntry {
    pub tick: u64,
    pub signature: TimeSignature,
}

#[derive(Debug, Clone, Copy)]
struct SignatureSegment {
    tick: u64,
    start_measure: u64,
    signature: TimeSignature,
    ticks_per_measure: u64,
}

/// Piecewise time-signature description of a score.
///
/// A signature change always opens a new measure; a measure cut short by a
/// change still counts as one measure.
#[derive(Debug, Clone)]
pub struct TimeSignatureMap {
    resolution: u32,
    segments: Vec<SignatureSegment>,
}

impl TimeSignatureMap {
    /// Build the map. Entries are sorted by tick, the first one is moved to
    /// tick 0 and an empty list means 4/4 throughout.
    pub fn new(resolution: u32, mut entries: Vec<TimeSignatureEntry>) -> SequencerResult<Self> {
        if resolution == 0 {
            return Err(SequencerError::InvalidResolution);
        }
        for entry in &entries {
            TimeSignature::new(entry.signature.numerator, entry.signature.denominator)?;
        }

        entries.sort_by_key(|e| e.tick);
        // Several changes at one tick: the last one wins
        entries.dedup_by(|later, earlier| {
            if later.tick == earlier.tick {
                earlier.signature = later.signature;
                true
            } else {
                false
            }
        });
        if entries.is_empty() {
            entries.push(TimeSignatureEntry {
                tick: 0,
                signature: TimeSignature::default(),
            });
        }
        entries[0].tick = 0;

        let mut segments: Vec<SignatureSegment> = Vec::with_capacity(entries.len());
        for entry in entries {
            let start_measure = match segments.last() {
                Some(prev) => {
                    let span = entry.tick - prev.tick;
                    prev.start_measure + span.div_ceil(prev.ticks_per_measure)
                }
                None => 0,
            };
            segments.push(SignatureSegment {
                tick: entry.tick,
                start_measure,
                signature: entry.signature,
                ticks_per_measure: entry.signature.ticks_per_measure(resolution),
            });
        }

        Ok(Self {
            resolution,
            segments,
        })
    }

    /// One signature for the whole score
    pub fn constant(resolution: u32, signature: TimeSignature) -> SequencerResult<Self> {
        Self::new(resolution, vec![TimeSignatureEntry { tick: 0, signature }])
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Entries as given (after normalisation)
    pub fn entries(&self) -> Vec<TimeSignatureEntry> {
        self.segments
            .iter()
            .map(|s| TimeSignatureEntry {
                tick: s.tick,
                signature: s.signature,
            })
            .collect()
    }

    fn segment_at_tick(&self, tick: u64) -> &SignatureSegment {
        let idx = self.segments.partition_point(|s| s.tick <= tick);
        &self.segments[idx.saturating_sub(1)]
    }

    fn segment_at_measure(&self, measure: u64) -> &SignatureSegment {
        let idx = self.segments.partition_point(|s| s.start_measure <= measure);
        &self.segments[idx.saturating_sub(1)]
    }

    /// Tick of the next signature change strictly after `tick`
    fn next_change_after(&self, tick: u64) -> Option<u64> {
        let idx = self.segments.partition_point(|s| s.tick <= tick);
        self.segments.get(idx).map(|s| s.tick)
    }

    /// Signature in force at `tick`
    pub fn signature_at(&self, tick: u64) -> TimeSignature {
        self.segment_at_tick(tick).signature
    }

    /// Measure/beat/offset to absolute tick.
    /// Beats and offsets larger than a measure simply run on.
    pub fn measure_to_tick(
        &self,
        measure: u32,
        beat: u32,
        offset: u64,
        mode: MetronomeMode,
    ) -> u64 {
        let seg = self.segment_at_measure(measure as u64);
        let beat_ticks = seg.signature.beat_ticks(self.resolution, mode);
        seg.tick
            .saturating_add((measure as u64 - seg.start_measure) * seg.ticks_per_measure)
            .saturating_add(beat as u64 * beat_ticks)
            .saturating_add(offset)
    }

    /// Absolute tick to measure/beat/offset
    pub fn tick_to_measure(&self, tick: u64, mode: MetronomeMode) -> MusicalTime {
        let seg = self.segment_at_tick(tick);
        let rel = tick - seg.tick;
        let measure = seg.start_measure + rel / seg.ticks_per_measure;
        let in_measure = rel % seg.ticks_per_measure;
        let beat_ticks = seg.signature.beat_ticks(self.resolution, mode);
        MusicalTime {
            measure: measure.min(u32::MAX as u64) as u32,
            beat: (in_measure / beat_ticks) as u32,
            offset: in_measure % beat_ticks,
        }
    }

    /// First beat boundary at or after `tick`
    pub fn next_beat_at_or_after(&self, tick: u64, mode: MetronomeMode) -> u64 {
        let seg = self.segment_at_tick(tick);
        let rel = tick - seg.tick;
        let in_measure = rel % seg.ticks_per_measure;
        let measure_start = tick - in_measure;
        let beat_ticks = seg.signature.beat_ticks(self.resolution, mode);
        if in_measure % beat_ticks == 0 {
            return tick;
        }
        let measure_end = measure_start.saturating_add(seg.ticks_per_measure);
        let candidate = measure_start
            .saturating_add((in_measure / beat_ticks + 1) * beat_ticks)
            .min(measure_end);
        match self.next_change_after(tick) {
            Some(change) => candidate.min(change),
            None => candidate,
        }
    }

    /// First beat boundary strictly after `tick`
    pub fn next_beat_after(&self, tick: u64, mode: MetronomeMode) -> u64 {
        self.next_beat_at_or_after(tick.saturating_add(1), mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(n: u8, d: u8) -> TimeSignature {
        TimeSignature::new(n, d).unwrap()
    }

    #[test]
    fn test_time_signature() {
        let ts = TimeSignature::four_four();
        assert_eq!(ts.numerator, 4);
        assert_eq!(ts.ticks_per_measure(480), 1920);
        assert_eq!(ts.to_string(), "4/4");
    }

    #[test]
    fn test_invalid_time_signature() {
        assert!(TimeSignature::new(0, 4).is_err());
        assert!(TimeSignature::new(4, 3).is_err());
        assert!(TimeSignature::new(4, 0).is_err());
    }

    #[test]
    fn test_compound_beat_length() {
        let six_eight = sig(6, 8);
        assert_eq!(six_eight.beat_ticks(480, MetronomeMode::FollowDenominator), 240);
        assert_eq!(six_eight.beat_ticks(480, MetronomeMode::FollowTheoretic), 720);
        assert_eq!(
            six_eight.beats_per_measure(480, MetronomeMode::FollowTheoretic),
            2
        );

        // 3/4 is not compound
        let three_four = sig(3, 4);
        assert_eq!(three_four.beat_ticks(480, MetronomeMode::FollowTheoretic), 480);
    }

    #[test]
    fn test_measure_conversion_constant() {
        let map = TimeSignatureMap::constant(480, TimeSignature::four_four()).unwrap();
        let mode = MetronomeMode::FollowDenominator;

        assert_eq!(map.measure_to_tick(0, 0, 0, mode), 0);
        assert_eq!(map.measure_to_tick(0, 1, 0, mode), 480);
        assert_eq!(map.measure_to_tick(1, 0, 0, mode), 1920);
        assert_eq!(map.measure_to_tick(2, 3, 10, mode), 2 * 1920 + 3 * 480 + 10);

        assert_eq!(map.tick_to_measure(1000, mode), MusicalTime::new(0, 2, 40));
        assert_eq!(map.tick_to_measure(1920, mode), MusicalTime::new(1, 0, 0));
    }

    #[test]
    fn test_measure_conversion_with_changes() {
        // 2 measures of 4/4, then 3/4
        let map = TimeSignatureMap::new(
            480,
            vec![
                TimeSignatureEntry {
                    tick: 0,
                    signature: sig(4, 4),
                },
                TimeSignatureEntry {
                    tick: 3840,
                    signature: sig(3, 4),
                },
            ],
        )
        .unwrap();
        let mode = MetronomeMode::FollowDenominator;

        assert_eq!(map.measure_to_tick(2, 0, 0, mode), 3840);
        assert_eq!(map.measure_to_tick(3, 0, 0, mode), 3840 + 1440);
        assert_eq!(map.tick_to_measure(3840 + 1440 + 480, mode), MusicalTime::new(3, 1, 0));
        assert_eq!(map.signature_at(5000), sig(3, 4));
    }

    #[test]
    fn test_change_inside_measure_opens_new_measure() {
        let map = TimeSignatureMap::new(
            480,
            vec![
                TimeSignatureEntry {
                    tick: 0,
                    signature: sig(4, 4),
                },
                TimeSignatureEntry {
                    tick: 2400, // one measure and a beat
                    signature: sig(2, 4),
                },
            ],
        )
        .unwrap();
        let mode = MetronomeMode::FollowDenominator;
        assert_eq!(map.tick_to_measure(2400, mode), MusicalTime::new(2, 0, 0));
        assert_eq!(map.measure_to_tick(2, 0, 0, mode), 2400);
        // Beat boundary right before the change is cut short
        assert_eq!(map.next_beat_at_or_after(2300, mode), 2400);
    }

    #[test]
    fn test_first_entry_moved_to_zero() {
        let map = TimeSignatureMap::new(
            480,
            vec![TimeSignatureEntry {
                tick: 960,
                signature: sig(3, 4),
            }],
        )
        .unwrap();
        assert_eq!(map.entries()[0].tick, 0);
        assert_eq!(map.signature_at(0), sig(3, 4));
    }

    #[test]
    fn test_next_beat() {
        let map = TimeSignatureMap::constant(480, TimeSignature::four_four()).unwrap();
        let mode = MetronomeMode::FollowDenominator;
        assert_eq!(map.next_beat_at_or_after(0, mode), 0);
        assert_eq!(map.next_beat_at_or_after(1, mode), 480);
        assert_eq!(map.next_beat_after(480, mode), 960);
    }

    #[test]
    fn test_musical_time_display() {
        assert_eq!(MusicalTime::new(3, 2, 5).to_string(), "3:02:005");
    }
}
