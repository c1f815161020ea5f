//! MIDI Tuning Standard sysex through the public synth interface


use phonon_synth::prelude::*;
use phonon_synth::sysex::{decode_bulk_dump, BULK_DUMP_BANK_LEN, BULK_DUMP_LEN, SYSEX_TUNING_NAME};
use synth_test_utils::*;

fn cents_ratio(cents: f64) -> f64 {
    2f64.powf(cents / 1200.0)
}

/// Scale/octave message, one byte per note: channels 0 and 3, +50 cents
fn octave_1byte(realtime: bool) -> Vec<u8> {
    let mut msg = vec![if realtime { 0x7F } else { 0x7E }, 0x7F, 0x08, 0x08, 0x00, 0x00, 0b1001];
    msg.extend([64 + 50; 12]);
    msg
}

fn phase_of(renderer: &Renderer, chan: usize) -> f64 {
    playing(renderer)
        .iter()
        .find(|v| v.chan == chan)
        .map(|v| v.phase_increment)
        .unwrap()
}

#[test]
fn test_realtime_octave_tuning_retunes_masked_channels() {
    let (mut synth, mut renderer) = sine_synth(SynthSettings::default());
    for chan in [0, 1, 3] {
        synth.note_on(chan, 69, 100).unwrap();
    }
    render_block(&mut renderer);
    let before: Vec<f64> = [0, 1, 3].iter().map(|&c| phase_of(&renderer, c)).collect();

    let reply = synth.sysex(&octave_1byte(true), false).unwrap();
    assert!(reply.handled);
    assert!(reply.response.is_none());
    render_block(&mut renderer);

    assert!((phase_of(&renderer, 0) / before[0] - cents_ratio(50.0)).abs() < 1e-9);
    assert_eq!(phase_of(&renderer, 1), before[1]);
    assert!((phase_of(&renderer, 3) / before[2] - cents_ratio(50.0)).abs() < 1e-9);
    assert_eq!(synth.tuning_dump(0, 0).unwrap().0, SYSEX_TUNING_NAME);
}

#[test]
fn test_non_realtime_octave_tuning_waits_for_next_note() {
    let (_synth, mut renderer) = sine_synth(SynthSettings::default());
    renderer.note_on(0, 69, 100).unwrap();
    let before = phase_of(&renderer, 0);

    assert!(renderer.sysex(&octave_1byte(false), false).unwrap().handled);
    assert_eq!(phase_of(&renderer, 0), before);

    renderer.note_on(0, 69, 100).unwrap();
    let retuned = playing(&renderer).last().unwrap().phase_increment;
    assert!((retuned / before - cents_ratio(50.0)).abs() < 1e-9);
}

#[test]
fn test_two_byte_octave_tuning() {
    let (_synth, mut renderer) = sine_synth(SynthSettings::default());
    // 8192 + 4096 is +50 cents
    let mut msg = vec![0x7F, 0x7F, 0x08, 0x09, 0x00, 0x00, 0x01];
    for _ in 0..12 {
        msg.extend([96, 0]);
    }
    renderer.note_on(0, 60, 100).unwrap();
    let before = phase_of(&renderer, 0);
    assert!(renderer.sysex(&msg, false).unwrap().handled);
    assert!((phase_of(&renderer, 0) / before - cents_ratio(50.0)).abs() < 1e-9);
}

#[test]
fn test_note_change_then_dump_round_trip() {
    let (mut synth, _renderer) = sine_synth(SynthSettings::default());
    // Program 10: key 60 to 61.5 semitones, key 64 to 63 + 25 cents
    let msg = [
        0x7E, 0x7F, 0x08, 0x02, 10, 2, //
        60, 61, 0x40, 0x00, //
        64, 63, 0x20, 0x00,
    ];
    assert!(synth.sysex(&msg, false).unwrap().handled);

    let reply = synth.sysex(&[0x7E, 0x7F, 0x08, 0x00, 10], false).unwrap();
    let resp = reply.response.unwrap();
    assert_eq!(resp.len(), BULK_DUMP_LEN);
    let (name, pitches) = decode_bulk_dump(&resp).unwrap();
    assert_eq!(name, "Unnamed");
    assert!((pitches[60] - 6150.0).abs() < 0.01);
    assert!((pitches[64] - 6325.0).abs() < 0.01);
    assert!((pitches[62] - 6200.0).abs() < 0.01);

    // Bank form of the same request
    synth.create_key_tuning(4, 10, "Banked", None).unwrap();
    let reply = synth.sysex(&[0x7E, 0x7F, 0x08, 0x03, 4, 10], false).unwrap();
    let resp = reply.response.unwrap();
    assert_eq!(resp.len(), BULK_DUMP_BANK_LEN);
    assert_eq!(decode_bulk_dump(&resp).unwrap().0, "Banked");
}

#[test]
fn test_bank_note_change_skips_no_change_entries() {
    let (mut synth, _renderer) = sine_synth(SynthSettings::default());
    let msg = [
        0x7E, 0x7F, 0x08, 0x07, 2, 3, 2, //
        69, 0x7F, 0x7F, 0x7F, //
        70, 71, 0x00, 0x00,
    ];
    assert!(synth.sysex(&msg, false).unwrap().handled);
    let (_, pitches) = synth.tuning_dump(2, 3).unwrap();
    assert_eq!(pitches[69], 6900.0);
    assert_eq!(pitches[70], 7100.0);
}

#[test]
fn test_device_id_filter() {
    let (mut synth, _renderer) = sine_synth(SynthSettings::default());
    synth.set_device_id(5).unwrap();
    let mut msg = octave_1byte(false);

    msg[1] = 3;
    assert!(!synth.sysex(&msg, false).unwrap().handled);
    msg[1] = 5;
    assert!(synth.sysex(&msg, true).unwrap().handled);
    // Dry run changed nothing
    assert!(synth.tunings().is_empty());
    assert!(synth.sysex(&msg, false).unwrap().handled);
    assert_eq!(synth.tunings(), vec![(0, 0)]);
}

#[test]
fn test_malformed_messages_not_handled() {
    let (mut synth, _renderer) = sine_synth(SynthSettings::default());
    // Wrong length for a one-byte octave message
    let mut short = octave_1byte(false);
    short.pop();
    assert!(!synth.sysex(&short, false).unwrap().handled);

    // Note count disagrees with the payload
    let bad_count = [0x7E, 0x7F, 0x08, 0x02, 0, 2, 60, 60, 0, 0];
    assert!(!synth.sysex(&bad_count, false).unwrap().handled);

    // Data byte with the high bit set
    let high_bit = [0x7E, 0x7F, 0x08, 0x02, 0, 1, 60, 0x80, 0, 0];
    assert!(!synth.sysex(&high_bit, false).unwrap().handled);

    // Unknown tuning sub-id
    assert!(!synth.sysex(&[0x7E, 0x7F, 0x08, 0x05, 0], false).unwrap().handled);
    assert!(synth.tunings().is_empty());
}

#[test]
fn test_sysex_from_raw_midi_bytes() {
    let (mut synth, mut renderer) = sine_synth(SynthSettings::default());
    let mut raw = vec![0xF0];
    raw.extend(octave_1byte(true));
    raw.push(0xF7);

    let event = MidiEvent::from_bytes(&raw).unwrap();
    synth.handle_midi_event(&event).unwrap();
    render_block(&mut renderer);
    assert_eq!(synth.tunings(), vec![(0, 0)]);
}
