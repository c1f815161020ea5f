//! Effect units fed by the voice send buses
//!
//! The synth owns one reverb and one chorus unit. Both receive a mono send buffer
//! per block and either mix their stereo output into the main group buffers or
//! replace the separate effect output buffers ([`FxMode`]).
//!
//! Parameter changes carry a set mask so a caller can update a subset of fields.

pub mod chorus;
pub mod reverb;

pub use chorus::ModulatedChorus;
pub use reverb::SchroederReverb;

use serde::{Deserialize, Serialize};

/// Set-mask bits for [`ReverbParams`]
pub mod reverb_mask {
    pub const ROOMSIZE: u32 = 1 << 0;
    pub const DAMPING: u32 = 1 << 1;
    pub const WIDTH: u32 = 1 << 2;
    pub const LEVEL: u32 = 1 << 3;
    pub const ALL: u32 = ROOMSIZE | DAMPING | WIDTH | LEVEL;
}

/// Set-mask bits for [`ChorusParams`]
pub mod chorus_mask {
    pub const VOICES: u32 = 1 << 0;
    pub const LEVEL: u32 = 1 << 1;
    pub const SPEED: u32 = 1 << 2;
    pub const DEPTH: u32 = 1 << 3;
    pub const WAVEFORM: u32 = 1 << 4;
    pub const ALL: u32 = VOICES | LEVEL | SPEED | DEPTH | WAVEFORM;
}

/// Reverb parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbParams {
    /// Room size 0.0-1.0 (feedback amount)
    pub roomsize: f64,
    /// High frequency damping 0.0-1.0
    pub damping: f64,
    /// Stereo width 0.0-100.0
    pub width: f64,
    /// Output level 0.0-1.0
    pub level: f64,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            roomsize: 0.2,
            damping: 0.0,
            width: 0.5,
            level: 0.9,
        }
    }
}

impl ReverbParams {
    /// Copy the fields selected by `mask` from `other` (empty mask selects all)
    pub fn apply(&mut self, mask: u32, other: &ReverbParams) {
        let mask = if mask == 0 { reverb_mask::ALL } else { mask };
        if mask & reverb_mask::ROOMSIZE != 0 {
            self.roomsize = other.roomsize;
        }
        if mask & reverb_mask::DAMPING != 0 {
            self.damping = other.damping;
        }
        if mask & reverb_mask::WIDTH != 0 {
            self.width = other.width;
        }
        if mask & reverb_mask::LEVEL != 0 {
            self.level = other.level;
        }
    }

    /// Whether every field selected by `mask` is a finite number
    pub fn is_finite(&self, mask: u32) -> bool {
        let mask = if mask == 0 { reverb_mask::ALL } else { mask };
        [
            (reverb_mask::ROOMSIZE, self.roomsize),
            (reverb_mask::DAMPING, self.damping),
            (reverb_mask::WIDTH, self.width),
            (reverb_mask::LEVEL, self.level),
        ]
        .iter()
        .all(|&(bit, value)| mask & bit == 0 || value.is_finite())
    }
}

/// Named reverb presets selectable with `set_reverb_preset`
pub const REVERB_PRESETS: [(&str, ReverbParams); 5] = [
    ("Test 1", ReverbParams { roomsize: 0.2, damping: 0.0, width: 0.5, level: 0.9 }),
    ("Test 2", ReverbParams { roomsize: 0.4, damping: 0.2, width: 0.5, level: 0.8 }),
    ("Test 3", ReverbParams { roomsize: 0.6, damping: 0.4, width: 0.5, level: 0.7 }),
    ("Test 4", ReverbParams { roomsize: 0.8, damping: 0.7, width: 0.5, level: 0.6 }),
    ("Test 5", ReverbParams { roomsize: 0.8, damping: 1.0, width: 0.5, level: 0.5 }),
];

/// Chorus LFO shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChorusWaveform {
    Sine,
    Triangle,
}

/// Chorus parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChorusParams {
    /// Number of chorus voices 0-99
    pub voices: u32,
    /// Output level 0.0-10.0
    pub level: f64,
    /// LFO speed in Hz
    pub speed: f64,
    /// Modulation depth in milliseconds
    pub depth_ms: f64,
    /// LFO waveform
    pub waveform: ChorusWaveform,
}

impl Default for ChorusParams {
    fn default() -> Self {
        Self {
            voices: 3,
            level: 2.0,
            speed: 0.3,
            depth_ms: 8.0,
            waveform: ChorusWaveform::Sine,
        }
    }
}

impl ChorusParams {
    /// Copy the fields selected by `mask` from `other` (empty mask selects all)
    pub fn apply(&mut self, mask: u32, other: &ChorusParams) {
        let mask = if mask == 0 { chorus_mask::ALL } else { mask };
        if mask & chorus_mask::VOICES != 0 {
            self.voices = other.voices;
        }
        if mask & chorus_mask::LEVEL != 0 {
            self.level = other.level;
        }
        if mask & chorus_mask::SPEED != 0 {
            self.speed = other.speed;
        }
        if mask & chorus_mask::DEPTH != 0 {
            self.depth_ms = other.depth_ms;
        }
        if mask & chorus_mask::WAVEFORM != 0 {
            self.waveform = other.waveform;
        }
    }

    /// Whether every float field selected by `mask` is a finite number
    pub fn is_finite(&self, mask: u32) -> bool {
        let mask = if mask == 0 { chorus_mask::ALL } else { mask };
        [
            (chorus_mask::LEVEL, self.level),
            (chorus_mask::SPEED, self.speed),
            (chorus_mask::DEPTH, self.depth_ms),
        ]
        .iter()
        .all(|&(bit, value)| mask & bit == 0 || value.is_finite())
    }
}

/// Whether an effect adds into the main output or replaces a dedicated fx output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FxMode {
    Mix,
    Replace,
}

/// Reverb effect unit
pub trait ReverbUnit: Send {
    fn set_params(&mut self, params: &ReverbParams);
    /// Process one block of mono send signal into a stereo pair
    fn process(&mut self, input: &[f32], left: &mut [f32], right: &mut [f32], mode: FxMode);
    /// Clear all internal delay state
    fn reset(&mut self);
}

/// Chorus effect unit
pub trait ChorusUnit: Send {
    fn set_params(&mut self, params: &ChorusParams);
    fn process(&mut self, input: &[f32], left: &mut [f32], right: &mut [f32], mode: FxMode);
    fn reset(&mut self);
}

#[inline]
pub(crate) fn write_out(out: &mut f32, value: f32, mode: FxMode) {
    match mode {
        FxMode::Mix => *out += value,
        FxMode::Replace => *out = value,
    }
}
