//! Renderer configuration loaded from JSON

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Standard YM2608 master clock
pub const DEFAULT_CLOCK: u32 = 7_987_200;

/// Highest accepted master volume percentage
pub const MAX_MASTER_VOLUME: i32 = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChipConfig {
    /// Master clock in Hz
    pub clock: u32,
    /// Output sample rate in Hz
    pub rate: u32,
    /// Audio buffer length in milliseconds
    pub duration_ms: u32,
    pub fm_volume_db: f64,
    pub ssg_volume_db: f64,
}

impl Default for ChipConfig {
    fn default() -> Self {
        Self {
            clock: DEFAULT_CLOCK,
            rate: 44100,
            duration_ms: 40,
            fm_volume_db: 0.0,
            ssg_volume_db: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Rebuild channel state when starting mid-song
    pub retrieve_channel_state: bool,
    /// Wrap to the first order after the last one
    pub loop_song: bool,
    /// Percentage applied to the mixed output
    pub master_volume: i32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            retrieve_channel_state: true,
            loop_song: true,
            master_volume: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chip: ChipConfig,
    pub playback: PlaybackConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chip.rate == 0 {
            return Err(Error::Config("chip.rate must be positive".into()));
        }
        if self.chip.clock == 0 {
            return Err(Error::Config("chip.clock must be positive".into()));
        }
        if !(0..=MAX_MASTER_VOLUME).contains(&self.playback.master_volume) {
            return Err(Error::Config(format!(
                "playback.master_volume {} outside 0-{}",
                self.playback.master_volume, MAX_MASTER_VOLUME
            )));
        }
        Ok(())
    }

    /// Frames in one audio buffer
    pub fn buffer_frames(&self) -> usize {
        (u64::from(self.chip.rate) * u64::from(self.chip.duration_ms) / 1000) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = Config::from_json_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.chip.clock, 7_987_200);
        assert!(config.playback.retrieve_channel_state);
        assert_eq!(config.buffer_frames(), 1764);
    }

    #[test]
    fn test_partial_section() {
        let config =
            Config::from_json_str(r#"{"chip": {"rate": 48000}, "playback": {"loop_song": false}}"#)
                .unwrap();
        assert_eq!(config.chip.rate, 48000);
        assert_eq!(config.chip.duration_ms, 40);
        assert!(!config.playback.loop_song);
        assert_eq!(config.playback.master_volume, 100);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Config::from_json_str(r#"{"chip": {"rate": 0}}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_json_str(r#"{"playback": {"master_volume": 250}}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(Config::from_json_str("[1"), Err(Error::Json(_))));
    }
}
