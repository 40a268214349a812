//! Sink configuration record and its persisted byte-blob form.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CENTER_FREQUENCY: u64 = 435_000_000;
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
/// Highest supported interpolation exponent (x64 output rate).
pub const MAX_LOG2_INTERPOLATION: u32 = 6;

const SETTINGS_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("malformed settings blob: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported settings version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkSettings {
    /// Transmit center frequency in Hz.
    pub center_frequency: u64,
    /// Baseband sample rate in Hz.
    pub sample_rate: u32,
    /// Interpolation exponent; output rate is `sample_rate << log2_interp`.
    pub log2_interp: u32,
}

/// Wire form of the settings. Fields added later must carry
/// `#[serde(default)]` so older blobs keep loading; unknown fields from
/// newer blobs are ignored. The version tag only changes on incompatible
/// layout changes.
#[derive(Serialize, Deserialize)]
struct SettingsBlob {
    version: u32,
    #[serde(default = "default_center_frequency")]
    center_frequency: u64,
    #[serde(default = "default_sample_rate")]
    sample_rate: u32,
    #[serde(default)]
    log2_interp: u32,
}

fn default_center_frequency() -> u64 {
    DEFAULT_CENTER_FREQUENCY
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

impl Default for SinkSettings {
    fn default() -> Self {
        SinkSettings {
            center_frequency: DEFAULT_CENTER_FREQUENCY,
            sample_rate: DEFAULT_SAMPLE_RATE,
            log2_interp: 0,
        }
    }
}

impl SinkSettings {
    pub fn reset_to_defaults(&mut self) {
        *self = SinkSettings::default();
    }

    /// Engine-side acceptance check. The controller UI clamps to its own
    /// narrower range; the engine only refuses what it cannot run.
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && self.log2_interp <= MAX_LOG2_INTERPOLATION
    }

    pub fn effective_sample_rate(&self) -> u64 {
        (self.sample_rate as u64) << self.log2_interp
    }

    pub fn serialize(&self) -> Vec<u8> {
        let blob = SettingsBlob {
            version: SETTINGS_VERSION,
            center_frequency: self.center_frequency,
            sample_rate: self.sample_rate,
            log2_interp: self.log2_interp,
        };
        serde_json::to_vec(&blob).expect("settings blob is plain data")
    }

    /// Replace `self` from a serialized blob. On any error `self` is left
    /// untouched; callers fall back to `reset_to_defaults`.
    pub fn deserialize(&mut self, data: &[u8]) -> Result<(), SettingsError> {
        let blob: SettingsBlob = serde_json::from_slice(data)?;
        if blob.version != SETTINGS_VERSION {
            return Err(SettingsError::UnsupportedVersion(blob.version));
        }
        self.center_frequency = blob.center_frequency;
        self.sample_rate = blob.sample_rate;
        self.log2_interp = blob.log2_interp;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SinkSettings::default();
        assert_eq!(settings.center_frequency, DEFAULT_CENTER_FREQUENCY);
        assert_eq!(settings.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(settings.log2_interp, 0);
        assert!(settings.is_valid());
    }

    #[test]
    fn test_serialize_round_trip() {
        let original = SinkSettings {
            center_frequency: 144_500_000,
            sample_rate: 96_000,
            log2_interp: 3,
        };
        let blob = original.serialize();
        let mut restored = SinkSettings::default();
        restored.deserialize(&blob).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_malformed_blob_leaves_settings_unchanged() {
        let mut settings = SinkSettings {
            center_frequency: 1_000_000,
            sample_rate: 250_000,
            log2_interp: 1,
        };
        let before = settings.clone();
        assert!(settings.deserialize(b"not json at all").is_err());
        assert_eq!(settings, before);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let mut settings = SinkSettings::default();
        settings
            .deserialize(br#"{"version":1,"sample_rate":192000}"#)
            .unwrap();
        assert_eq!(settings.sample_rate, 192_000);
        assert_eq!(settings.center_frequency, DEFAULT_CENTER_FREQUENCY);
        assert_eq!(settings.log2_interp, 0);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let mut settings = SinkSettings::default();
        settings
            .deserialize(br#"{"version":1,"sample_rate":64000,"future_field":true}"#)
            .unwrap();
        assert_eq!(settings.sample_rate, 64_000);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut settings = SinkSettings::default();
        let before = settings.clone();
        let err = settings
            .deserialize(br#"{"version":9,"sample_rate":64000}"#)
            .unwrap_err();
        assert!(matches!(err, SettingsError::UnsupportedVersion(9)));
        assert_eq!(settings, before);
    }

    #[test]
    fn test_effective_rate_applies_interpolation() {
        let settings = SinkSettings {
            center_frequency: DEFAULT_CENTER_FREQUENCY,
            sample_rate: 48_000,
            log2_interp: 2,
        };
        assert_eq!(settings.effective_sample_rate(), 192_000);
    }

    #[test]
    fn test_validation_bounds() {
        let mut settings = SinkSettings::default();
        settings.sample_rate = 0;
        assert!(!settings.is_valid());
        settings.sample_rate = 1;
        settings.log2_interp = MAX_LOG2_INTERPOLATION + 1;
        assert!(!settings.is_valid());
    }
}
