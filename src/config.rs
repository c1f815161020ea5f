//! Synth settings
//!
//! Settings are human-readable TOML, every field optional:
//!
//! ```toml
//! sample_rate = 48000.0
//! polyphony = 64
//! cpu_cores = 4
//!
//! [reverb]
//! roomsize = 0.6
//! level = 0.7
//! ```
//!
//! [`SynthSettings::validated`] normalises out-of-range values before a synth is
//! built from them.

use crate::error::{SynthError, SynthResult};
use crate::fx::{ChorusParams, ReverbParams};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Construction-time settings for a synth instance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthSettings {
    /// Output sample rate in Hz
    pub sample_rate: f64,
    /// Size of the voice pool
    pub polyphony: usize,
    /// Number of MIDI channels (multiple of 16)
    pub midi_channels: usize,
    /// Number of stereo output pairs
    pub audio_channels: usize,
    /// Number of stereo mixing groups (voices mix into group chan % groups)
    pub audio_groups: usize,
    /// Number of effect output channels (always 2: reverb and chorus)
    pub effects_channels: usize,
    /// Master gain
    pub gain: f32,
    /// Device id used to match MIDI tuning sysex messages
    pub device_id: u8,
    /// Rendering cores including the calling thread (0 = all available)
    pub cpu_cores: usize,
    pub reverb_active: bool,
    pub chorus_active: bool,
    /// Log every MIDI event at info level
    pub verbose: bool,
    /// Commands per thread queue
    pub queue_capacity: usize,
    /// Maximum number of threads with a command queue at any one time
    pub max_queues: usize,
    /// Capacity of the return queue to the background thread
    pub return_queue_capacity: usize,
    /// Pin core worker threads to CPU cores
    pub pin_core_threads: bool,
    pub reverb: ReverbParams,
    pub chorus: ChorusParams,
}

impl Default for SynthSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            polyphony: 256,
            midi_channels: 16,
            audio_channels: 1,
            audio_groups: 1,
            effects_channels: 2,
            gain: 0.2,
            device_id: 0,
            cpu_cores: 1,
            reverb_active: true,
            chorus_active: true,
            verbose: false,
            queue_capacity: 1024,
            max_queues: 16,
            return_queue_capacity: 1024,
            pin_core_threads: false,
            reverb: ReverbParams::default(),
            chorus: ChorusParams::default(),
        }
    }
}

impl SynthSettings {
    /// Parse settings from TOML content
    pub fn from_toml_str(content: &str) -> SynthResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> SynthResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> SynthResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save to a TOML file
    pub fn save(&self, path: &Path) -> SynthResult<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Return a copy with every value brought into its supported range
    ///
    /// Each adjustment is logged as a warning. Fails only on values that
    /// cannot be repaired (non-positive sample rate, zero-sized queues).
    pub fn validated(&self) -> SynthResult<Self> {
        let mut s = self.clone();

        if !(s.sample_rate.is_finite() && s.sample_rate > 0.0) {
            return Err(SynthError::Config(format!(
                "sample_rate must be positive, got {}",
                s.sample_rate
            )));
        }
        if s.queue_capacity == 0 || s.max_queues == 0 || s.return_queue_capacity == 0 {
            return Err(SynthError::Config(
                "queue capacities must be at least 1".to_string(),
            ));
        }

        if !(s.reverb.is_finite(0) && s.chorus.is_finite(0)) {
            return Err(SynthError::Config(
                "reverb and chorus parameters must be finite".to_string(),
            ));
        }

        if s.midi_channels == 0 || s.midi_channels % 16 != 0 {
            let rounded = (s.midi_channels / 16 + 1) * 16;
            warn!(
                "Requested number of MIDI channels is not a multiple of 16. Increasing to {}",
                rounded
            );
            s.midi_channels = rounded;
        }

        let channels = s.audio_channels.clamp(1, 128);
        if channels != s.audio_channels {
            warn!("audio_channels {} out of range, using {}", s.audio_channels, channels);
            s.audio_channels = channels;
        }

        let groups = s.audio_groups.clamp(s.audio_channels, 128);
        if groups != s.audio_groups {
            warn!("audio_groups {} out of range, using {}", s.audio_groups, groups);
            s.audio_groups = groups;
        }

        if s.effects_channels != 2 {
            warn!("Invalid number of effects channels ({}). Setting to 2", s.effects_channels);
            s.effects_channels = 2;
        }

        let gain = if s.gain.is_finite() {
            s.gain.clamp(0.0, 10.0)
        } else {
            Self::default().gain
        };
        if gain != s.gain {
            warn!("gain {} out of range, using {}", s.gain, gain);
            s.gain = gain;
        }

        if s.polyphony < 1 {
            warn!("polyphony must be at least 1, using 1");
            s.polyphony = 1;
        }

        if s.cpu_cores == 0 {
            s.cpu_cores = num_cpus::get().max(1);
        }

        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::ChorusWaveform;

    #[test]
    fn test_empty_toml_is_default() {
        let settings = SynthSettings::from_toml_str("").unwrap();
        assert_eq!(settings, SynthSettings::default());
    }

    #[test]
    fn test_partial_toml() {
        let toml = r#"
            polyphony = 32
            cpu_cores = 4

            [reverb]
            roomsize = 0.6

            [chorus]
            waveform = "triangle"
        "#;
        let settings = SynthSettings::from_toml_str(toml).unwrap();
        assert_eq!(settings.polyphony, 32);
        assert_eq!(settings.cpu_cores, 4);
        assert_eq!(settings.reverb.roomsize, 0.6);
        assert_eq!(settings.reverb.level, 0.9);
        assert_eq!(settings.chorus.waveform, ChorusWaveform::Triangle);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = SynthSettings::from_toml_str("polyphony = \"many\"").unwrap_err();
        assert!(matches!(err, SynthError::Config(_)));
    }

    #[test]
    fn test_validated_normalises() {
        let settings = SynthSettings {
            midi_channels: 20,
            audio_channels: 2,
            audio_groups: 1,
            effects_channels: 4,
            gain: 25.0,
            polyphony: 0,
            cpu_cores: 0,
            ..SynthSettings::default()
        };
        let v = settings.validated().unwrap();
        assert_eq!(v.midi_channels, 32);
        assert_eq!(v.audio_groups, 2);
        assert_eq!(v.effects_channels, 2);
        assert_eq!(v.gain, 10.0);
        assert_eq!(v.polyphony, 1);
        assert!(v.cpu_cores >= 1);
    }

    #[test]
    fn test_validated_rejects_bad_sample_rate() {
        let settings = SynthSettings {
            sample_rate: 0.0,
            ..SynthSettings::default()
        };
        assert!(settings.validated().is_err());
    }

    #[test]
    fn test_validated_rejects_non_finite_values() {
        let settings = SynthSettings {
            gain: f32::NAN,
            ..SynthSettings::default()
        };
        assert_eq!(settings.validated().unwrap().gain, 0.2);

        let mut settings = SynthSettings::default();
        settings.reverb.roomsize = f64::NAN;
        assert!(matches!(settings.validated(), Err(SynthError::Config(_))));

        let mut settings = SynthSettings::default();
        settings.chorus.speed = f64::INFINITY;
        assert!(matches!(settings.validated(), Err(SynthError::Config(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("synth.toml");
        let settings = SynthSettings {
            polyphony: 48,
            device_id: 3,
            ..SynthSettings::default()
        };
        settings.save(&path).unwrap();
        let loaded = SynthSettings::from_file(&path).unwrap();
        assert_eq!(loaded, settings);
    }
}
