// Sequencer configuration
// Loaded from RON or JSON; every field has a default so partial files are fine

use crate::error::{SequencerError, SequencerResult};
use crate::sequencer::timeline::MetronomeMode;
use crate::sequencer::transport::{PlayMode, TimeShiftMode};
use ron::{from_str as ron_from_str, to_string as ron_to_string};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// MIDI clock ticks per quarter note
    pub resolution: u32,
    /// Period of the threaded tick driver (ms)
    pub tick_interval_ms: f64,
    /// Upper bound on events and beats handled in one tick
    pub max_events_per_tick: usize,
    /// Reject seeks past the end of the score
    pub strict_seek_bounds: bool,
    pub play_mode: PlayMode,
    pub time_shift_mode: TimeShiftMode,
    pub metronome_mode: MetronomeMode,
    /// Count-in length in beats (count-in itself starts disabled)
    pub count_in_beats: u32,
    /// Capacity of the notification ring buffer
    pub notification_capacity: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            resolution: 480,
            tick_interval_ms: 1.0,
            max_events_per_tick: 100,
            strict_seek_bounds: true,
            play_mode: PlayMode::Bounded,
            time_shift_mode: TimeShiftMode::PerTrack,
            metronome_mode: MetronomeMode::FollowDenominator,
            count_in_beats: 4,
            notification_capacity: 256,
        }
    }
}

impl SequencerConfig {
    /// Check value ranges
    pub fn validate(&self) -> SequencerResult<()> {
        if self.resolution == 0 {
            return Err(SequencerError::Config(
                "resolution must be greater than zero".to_string(),
            ));
        }
        if !self.tick_interval_ms.is_finite() || self.tick_interval_ms <= 0.0 {
            return Err(SequencerError::Config(format!(
                "tick_interval_ms must be positive, got {}",
                self.tick_interval_ms
            )));
        }
        if self.max_events_per_tick == 0 {
            return Err(SequencerError::Config(
                "max_events_per_tick must be greater than zero".to_string(),
            ));
        }
        if self.notification_capacity == 0 {
            return Err(SequencerError::Config(
                "notification_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a RON document
    pub fn from_ron_str(data: &str) -> SequencerResult<Self> {
        let config: Self = ron_from_str(data).map_err(|e| {
            SequencerError::Config(format!("Failed to deserialize from RON: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(data: &str) -> SequencerResult<Self> {
        let config: Self = serde_json::from_str(data).map_err(|e| {
            SequencerError::Config(format!("Failed to deserialize from JSON: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_ron_string(&self) -> SequencerResult<String> {
        ron_to_string(self)
            .map_err(|e| SequencerError::Config(format!("Failed to serialize to RON: {}", e)))
    }

    pub fn to_json_string(&self) -> SequencerResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SequencerError::Config(format!("Failed to serialize to JSON: {}", e)))
    }

    /// Load from a `.json` or `.ron` file
    pub fn load(path: &Path) -> SequencerResult<Self> {
        let data = std::fs::read_to_string(path)?;
        match ConfigFormat::from_path(path)? {
            ConfigFormat::Json => Self::from_json_str(&data),
            ConfigFormat::Ron => Self::from_ron_str(&data),
        }
    }

    /// Save to a `.json` or `.ron` file
    pub fn save(&self, path: &Path) -> SequencerResult<()> {
        let data = match ConfigFormat::from_path(path)? {
            ConfigFormat::Json => self.to_json_string()?,
            ConfigFormat::Ron => self.to_ron_string()?,
        };
        std::fs::write(path, data)?;
        Ok(())
    }
}

enum ConfigFormat {
    Json,
    Ron,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> SequencerResult<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(ConfigFormat::Json),
            Some(ext) if ext.eq_ignore_ascii_case("ron") => Ok(ConfigFormat::Ron),
            _ => Err(SequencerError::Config(format!(
                "Unsupported config file extension: {}",
                path.display()
            ))),
        }
    }
}
