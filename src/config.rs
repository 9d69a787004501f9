//! Engine configuration.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default output sample rate (44.1 kHz standard).
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default release envelope length in milliseconds.
pub const DEFAULT_RELEASE_MS: u64 = 100;

/// Settings for the playback and recording engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding one sample file per note (`<dir>/<note>.<ext>`).
    pub sample_dir: PathBuf,
    /// Sample file extension, without the dot.
    pub sample_extension: String,
    /// Directory that receives exported recordings.
    pub download_dir: PathBuf,
    /// Bus sample rate in Hz.
    pub sample_rate: u32,
    /// Length of the linear release fade.
    pub release_ms: u64,
    /// Master volume at startup, 0.0 to 1.0.
    pub initial_volume: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_dir: PathBuf::from("sounds"),
            sample_extension: "mp3".to_string(),
            download_dir: PathBuf::from("."),
            sample_rate: DEFAULT_SAMPLE_RATE,
            release_ms: DEFAULT_RELEASE_MS,
            initial_volume: 1.0,
        }
    }
}

impl EngineConfig {
    /// Returns the release window as a duration.
    pub fn release(&self) -> Duration {
        Duration::from_millis(self.release_ms)
    }

    /// Checks the settings that would otherwise fail deep inside the engine.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.sample_rate == 0 {
            return Err(EngineError::Config("sample rate must be positive".into()));
        }
        if self.sample_extension.is_empty() || self.sample_extension.starts_with('.') {
            return Err(EngineError::Config(format!(
                "sample extension must be given without a dot: {:?}",
                self.sample_extension
            )));
        }
        if !(0.0..=1.0).contains(&self.initial_volume) {
            return Err(EngineError::Config(format!(
                "initial volume {} outside 0.0..=1.0",
                self.initial_volume
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.release(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"sample_extension":"wav"}"#).unwrap();
        assert_eq!(config.sample_extension, "wav");
        assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = EngineConfig {
            sample_rate: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            sample_extension: ".mp3".into(),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            initial_volume: 1.5,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
