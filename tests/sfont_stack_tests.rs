//! SoundFont stack, loaders and program selection


use hound::{SampleFormat, WavSpec, WavWriter};
use phonon_synth::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use synth_test_utils::*;

fn preset_name(renderer: &Renderer, chan: usize) -> String {
    renderer.get_channel_info(chan).unwrap().name
}

#[test]
fn test_top_of_stack_wins() {
    let (_synth, mut renderer) = sine_synth(SynthSettings::default());
    let builtin = renderer.get_sfont(0).unwrap().id();
    let upper = renderer
        .add_sfont(Box::new(melodic_font("upper", &[(0, 0)])))
        .unwrap();

    assert_eq!(renderer.sfcount(), 2);
    assert_eq!(renderer.get_sfont(0).unwrap().id(), upper);
    assert_eq!(renderer.get_sfont(1).unwrap().id(), builtin);
    assert_eq!(preset_name(&renderer, 0), "upper 0:0");

    // Not in the upper font, found further down
    renderer.program_change(1, 1).unwrap();
    assert_eq!(preset_name(&renderer, 1), "Sine Pluck");
    assert_eq!(renderer.get_program(1).unwrap(), (builtin, 0, 1));
    assert_eq!(preset_name(&renderer, 9), "Sine Kit");
}

#[test]
fn test_unload_frees_font_after_its_presets() {
    let (synth, mut renderer) = sine_synth(SynthSettings::default());
    let id = renderer
        .add_sfont(Box::new(melodic_font("upper", &[(0, 0)])))
        .unwrap();
    let upper = renderer.get_sfont_by_id(id).unwrap();
    assert!(upper.refcount() > 1);

    renderer.sfunload(id, true).unwrap();
    assert!(renderer.get_sfont_by_id(id).is_none());
    assert_eq!(preset_name(&renderer, 0), "Sine Organ");

    assert!(wait_until(Duration::from_secs(2), || {
        synth.reclaim_stats().soundfonts_freed == 1
    }));
    assert_eq!(upper.refcount(), 0);
    assert!(matches!(renderer.sfunload(id, true), Err(SynthError::NotFound(_))));
}

#[test]
fn test_unload_without_reset_unassigns_its_channels() {
    let (_synth, mut renderer) = sine_synth(SynthSettings::default());
    let id = renderer
        .add_sfont(Box::new(melodic_font("upper", &[(0, 0)])))
        .unwrap();
    assert_eq!(renderer.get_channel_info(0).unwrap().sfont_id, id);

    renderer.sfunload(id, false).unwrap();
    let info = renderer.get_channel_info(0).unwrap();
    assert!(!info.assigned);
    assert_eq!(info.sfont_id, id);
    // The drum channel kept its preset from the builtin font
    assert_eq!(preset_name(&renderer, 9), "Sine Kit");

    assert!(matches!(renderer.note_on(0, 60, 100), Err(SynthError::NoPreset(0))));
    assert!(playing(&renderer).is_empty());
}

#[test]
fn test_program_change_fallbacks() {
    let (_synth, mut renderer) = sine_synth(SynthSettings::default());
    renderer.program_change(0, 2).unwrap();
    assert_eq!(preset_name(&renderer, 0), "Sine Pad");

    // Missing bank falls back to bank 0 with the same program
    renderer.bank_select(0, 5).unwrap();
    renderer.program_change(0, 1).unwrap();
    assert_eq!(preset_name(&renderer, 0), "Sine Pluck");
    let (_, bank, prog) = renderer.get_program(0).unwrap();
    assert_eq!((bank, prog), (5, 1));

    // Missing program falls back to bank 0 program 0
    renderer.program_change(0, 50).unwrap();
    assert_eq!(preset_name(&renderer, 0), "Sine Organ");

    // Drum channel falls back to the first kit
    renderer.program_change(9, 30).unwrap();
    assert_eq!(preset_name(&renderer, 9), "Sine Kit");

    renderer.unset_program(0).unwrap();
    assert!(!renderer.get_channel_info(0).unwrap().assigned);
    assert_eq!(renderer.get_program(0).unwrap().2, 0);
    assert!(renderer.program_change(0, 129).is_err());
}

#[test]
fn test_bank_offset_shifts_lookup() {
    let (_synth, mut renderer) = sine_synth(SynthSettings::default());
    let id = renderer
        .add_sfont(Box::new(melodic_font("shifted", &[(0, 7)])))
        .unwrap();
    renderer.set_bank_offset(id, 2).unwrap();
    assert_eq!(renderer.get_bank_offset(id).unwrap(), 2);

    renderer.bank_select(0, 2).unwrap();
    renderer.program_change(0, 7).unwrap();
    assert_eq!(preset_name(&renderer, 0), "shifted 0:7");

    assert!(renderer.set_bank_offset(999, 1).is_err());
    assert!(renderer.get_bank_offset(999).is_err());
}

#[test]
fn test_select_by_font_name_and_id() {
    let (_synth, mut renderer) = sine_synth(SynthSettings::default());
    let id = renderer
        .add_sfont(Box::new(melodic_font("other", &[(3, 4)])))
        .unwrap();
    assert_eq!(renderer.get_sfont_by_name("other").unwrap().id(), id);
    assert!(renderer.get_sfont_by_name("nothing").is_none());

    renderer.program_select_by_sfont_name(0, "other", 3, 4).unwrap();
    assert_eq!(renderer.get_program(0).unwrap(), (id, 3, 4));
    assert_eq!(preset_name(&renderer, 0), "other 3:4");

    assert!(matches!(
        renderer.program_select_by_sfont_name(0, "nothing", 0, 0),
        Err(SynthError::NotFound(_))
    ));
    assert!(matches!(
        renderer.program_select(0, id, 0, 0),
        Err(SynthError::NotFound(_))
    ));
    // Failed selections leave the channel alone
    assert_eq!(preset_name(&renderer, 0), "other 3:4");
}

/// Serves "switchable:font" while enabled, counting loads
#[derive(Default)]
struct SwitchableLoader {
    disabled: AtomicBool,
    loads: AtomicUsize,
}

impl SoundFontLoader for SwitchableLoader {
    fn load(&self, filename: &str) -> Option<Box<dyn SoundFont>> {
        if filename != "switchable:font" || self.disabled.load(Ordering::SeqCst) {
            return None;
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(melodic_font(filename, &[(0, 5)])))
    }
}

#[test]
fn test_reload_keeps_id_position_and_offset() {
    let (synth, mut renderer) = sine_synth(SynthSettings::default());
    let loader = Arc::new(SwitchableLoader::default());
    renderer.add_sfloader(Arc::clone(&loader) as Arc<dyn SoundFontLoader>);

    let id = renderer.sfload("switchable:font", false).unwrap();
    renderer.add_sfont(Box::new(melodic_font("above", &[]))).unwrap();
    renderer.set_bank_offset(id, 3).unwrap();
    assert_eq!(renderer.get_sfont(1).unwrap().id(), id);

    renderer.sfreload(id).unwrap();
    assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    assert_eq!(renderer.get_sfont(1).unwrap().id(), id);
    assert_eq!(renderer.get_bank_offset(id).unwrap(), 3);
    assert_eq!(renderer.sfcount(), 3);
    assert!(wait_until(Duration::from_secs(2), || {
        synth.reclaim_stats().soundfonts_freed == 1
    }));

    // A failed reload keeps the loaded font
    loader.disabled.store(true, Ordering::SeqCst);
    assert!(matches!(renderer.sfreload(id), Err(SynthError::LoadFailed(_))));
    assert_eq!(renderer.get_sfont(1).unwrap().id(), id);
    assert!(matches!(renderer.sfreload(999), Err(SynthError::NotFound(_))));
}

#[test]
fn test_unknown_file_fails_to_load() {
    let (_synth, mut renderer) = Synth::new(&SynthSettings::default()).unwrap();
    assert!(matches!(
        renderer.sfload("missing.sf2", true),
        Err(SynthError::LoadFailed(_))
    ));
    assert_eq!(renderer.sfcount(), 0);
}

#[test]
fn test_wav_file_plays_at_recorded_pitch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE as u32,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&path, spec).unwrap();
    for i in 0..SAMPLE_RATE as usize {
        let phase = 2.0 * std::f64::consts::PI * 440.0 * i as f64 / SAMPLE_RATE;
        writer.write_sample((phase.sin() * 16000.0) as i16).unwrap();
    }
    writer.finalize().unwrap();

    let (_synth, mut renderer) = Synth::new(&SynthSettings::default()).unwrap();
    let filename = path.to_str().unwrap();
    let id = renderer.sfload(filename, true).unwrap();
    assert_eq!(renderer.get_sfont_by_name(filename).unwrap().id(), id);
    assert_eq!(preset_name(&renderer, 0), "tone");

    renderer.note_on(0, 60, 100).unwrap();
    let (left, _) = render(&mut renderer, 8192);
    assert!(calculate_rms(&left) > 1e-3);
    let freq = find_dominant_frequency(&left, SAMPLE_RATE);
    assert!((freq - 440.0).abs() < 10.0, "dominant frequency {}", freq);
}
