//! Procedural sine SoundFont, loaded by the name `builtin:sine`
//!
//! Bank 0 holds a few melodic sine presets that differ in envelope; bank 128
//! holds a small kit whose hi-hats share exclusive class 1.

use crate::generator::{GenSet, GenType};
use crate::sfont::{SampleFont, SamplePreset, SoundFont, SoundFontLoader, Zone};
use crate::voice::Sample;
use std::sync::Arc;

/// Name the built-in loader answers to
pub const BUILTIN_SINE: &str = "builtin:sine";

// One cycle of the sine table
const CYCLE_LEN: usize = 1024;

/// Loader for the built-in sine font
#[derive(Debug, Default)]
pub struct SineFontLoader;

impl SoundFontLoader for SineFontLoader {
    fn load(&self, filename: &str) -> Option<Box<dyn SoundFont>> {
        (filename == BUILTIN_SINE).then(|| Box::new(sine_font()) as Box<dyn SoundFont>)
    }
}

/// Build the built-in sine font
pub fn sine_font() -> SampleFont {
    let sine = Arc::new(Sample::sine("sine", CYCLE_LEN, 69, 440.0));
    let melodic = |name: &str, prog: u32, gens: GenSet| {
        SamplePreset::new(name, 0, prog, vec![Zone::full(Arc::clone(&sine), gens)])
    };

    let organ = GenSet::default()
        .with(GenType::AttackVolEnv, -7973.0)
        .with(GenType::ReleaseVolEnv, -7973.0);
    let pluck = GenSet::default()
        .with(GenType::DecayVolEnv, -1200.0)
        .with(GenType::SustainVolEnv, 1440.0)
        .with(GenType::ReleaseVolEnv, -2400.0);
    let pad = GenSet::default()
        .with(GenType::AttackVolEnv, -1200.0)
        .with(GenType::ReleaseVolEnv, 0.0)
        .with(GenType::ReverbSend, 300.0)
        .with(GenType::ChorusSend, 300.0);

    let mut presets = vec![
        melodic("Sine Organ", 0, organ),
        melodic("Sine Pluck", 1, pluck),
        melodic("Sine Pad", 2, pad),
    ];
    presets.push(kit(&sine));
    SampleFont::new(BUILTIN_SINE, presets)
}

fn kit(sine: &Arc<Sample>) -> SamplePreset {
    let drum = |key: u8, root: f32, decay: f32, class: f32| {
        let gens = GenSet::default()
            .with(GenType::OverrideRootKey, root)
            .with(GenType::DecayVolEnv, decay)
            .with(GenType::SustainVolEnv, 1440.0)
            .with(GenType::ReleaseVolEnv, -4800.0)
            .with(GenType::ExclusiveClass, class);
        Zone::full(Arc::clone(sine), gens).with_keys(key..=key)
    };
    SamplePreset::new(
        "Sine Kit",
        crate::midi::DRUM_BANK,
        0,
        vec![
            drum(36, 84.0, -2400.0, 0.0),
            drum(38, 60.0, -3600.0, 0.0),
            drum(42, 30.0, -4800.0, 1.0),
            drum(46, 30.0, -1200.0, 1.0),
        ],
    )
}
