//! MIDI, preset, gain, polyphony and effect control
//!
//! Every operation validates its arguments before touching any state. Values
//! other threads query (controllers, bank/program, gain, effect parameters) are
//! stored right away; the work that touches voices travels as a [`Command`].

use super::sealed::Sealed;
use super::data7;
use crate::channel::{ChannelInfo, PROG_UNSET};
use crate::command::{ChannelPreset, Command};
use crate::error::{ensure, SynthError, SynthResult};
use crate::fx::{chorus_mask, reverb_mask, ChorusParams, ReverbParams, REVERB_PRESETS};
use crate::generator::GenType;
use crate::midi::{cc, MidiEvent, MidiEventType, DRUM_BANK, DRUM_CHANNEL};
use crate::sysex::{self, SysexReply};
use crate::voice::BLOCK_SIZE;
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};

/// Highest pitch wheel sensitivity in semitones
pub const MAX_PITCH_WHEEL_SENS: u32 = 72;
/// Highest bank number reachable with bank select MSB/LSB
pub const MAX_BANK: u32 = 16383;
/// Upper bound of the master gain
pub const MAX_GAIN: f32 = 10.0;

/// Synth operations available on both [`super::Synth`] and [`super::Renderer`]
pub trait SynthControl: Sealed {
    fn note_on(&mut self, chan: usize, key: u32, vel: u32) -> SynthResult<()> {
        let key = data7(key, "key")?;
        let vel = data7(vel, "velocity")?;
        self.shared().channel(chan)?;
        self.submit(Command::Midi {
            kind: MidiEventType::NoteOn,
            chan,
            param1: key as u32,
            param2: vel as u32,
        })
    }

    fn note_off(&mut self, chan: usize, key: u32) -> SynthResult<()> {
        let key = data7(key, "key")?;
        self.shared().channel(chan)?;
        self.submit(Command::Midi {
            kind: MidiEventType::NoteOff,
            chan,
            param1: key as u32,
            param2: 0,
        })
    }

    /// Controller change; the value is readable with [`SynthControl::get_cc`] at once
    fn cc(&mut self, chan: usize, num: u32, value: u32) -> SynthResult<()> {
        let num = data7(num, "controller")?;
        let value = data7(value, "controller value")?;
        let shared = self.shared();
        let controls = shared.channel(chan)?;
        if shared.verbose() {
            info!("cc\t{}\t{}\t{}", chan, num, value);
        }

        controls.set_cc(num, value);
        match num {
            cc::BANK_SELECT_MSB => controls.set_bank_msb(value),
            cc::BANK_SELECT_LSB => controls.set_bank_lsb(value),
            _ => {}
        }

        self.submit(Command::Midi {
            kind: MidiEventType::ControlChange,
            chan,
            param1: num as u32,
            param2: value as u32,
        })
    }

    fn get_cc(&self, chan: usize, num: u32) -> SynthResult<u8> {
        let num = data7(num, "controller")?;
        Ok(self.shared().channel(chan)?.cc(num))
    }

    fn channel_pressure(&mut self, chan: usize, value: u32) -> SynthResult<()> {
        let value = data7(value, "channel pressure")?;
        let shared = self.shared();
        if shared.verbose() {
            info!("channelpressure\t{}\t{}", chan, value);
        }
        shared.channel(chan)?.set_channel_pressure(value);
        self.submit(Command::Midi {
            kind: MidiEventType::ChannelPressure,
            chan,
            param1: value as u32,
            param2: 0,
        })
    }

    /// Pitch bend, 0..=16383 with 8192 centred
    fn pitch_bend(&mut self, chan: usize, value: u32) -> SynthResult<()> {
        ensure(value <= 16383, || format!("pitch bend {} out of range", value))?;
        let shared = self.shared();
        if shared.verbose() {
            info!("pitchb\t{}\t{}", chan, value);
        }
        shared.channel(chan)?.set_pitch_bend(value as u16);
        self.submit(Command::Midi {
            kind: MidiEventType::PitchBend,
            chan,
            param1: value,
            param2: 0,
        })
    }

    fn get_pitch_bend(&self, chan: usize) -> SynthResult<u16> {
        Ok(self.shared().channel(chan)?.pitch_bend())
    }

    /// Pitch wheel range in semitones
    fn pitch_wheel_sens(&mut self, chan: usize, value: u32) -> SynthResult<()> {
        ensure(value <= MAX_PITCH_WHEEL_SENS, || {
            format!("pitch wheel sensitivity {} out of range", value)
        })?;
        let shared = self.shared();
        if shared.verbose() {
            info!("pitchsens\t{}\t{}", chan, value);
        }
        let controls = shared.channel(chan)?;
        controls.set_pitch_wheel_sensitivity(value as u8);
        let bend = controls.pitch_bend() as u32;
        self.submit(Command::Midi {
            kind: MidiEventType::PitchBend,
            chan,
            param1: bend,
            param2: 0,
        })
    }

    fn get_pitch_wheel_sens(&self, chan: usize) -> SynthResult<u8> {
        Ok(self.shared().channel(chan)?.pitch_wheel_sensitivity())
    }

    /// Select a preset from the SoundFont stack by the channel's bank and `prog`
    ///
    /// Falls back to bank 0 (then program 0) for melodic channels and to
    /// program 0 of the percussion bank on the drum channel. `prog` 128 unsets
    /// the channel's preset.
    fn program_change(&mut self, chan: usize, prog: u32) -> SynthResult<()> {
        ensure(prog <= PROG_UNSET, || format!("program {} out of range", prog))?;
        let shared = self.shared();
        let controls = shared.channel(chan)?;
        let (_, bank, _) = controls.sfont_bank_prog();
        let bank = if chan == DRUM_CHANNEL { DRUM_BANK } else { bank };

        if shared.verbose() {
            info!("prog\t{}\t{}\t{}", chan, bank, prog);
        }

        let preset = if prog == PROG_UNSET {
            None
        } else {
            let library = shared.library();
            library.find_preset(bank, prog).or_else(|| {
                let (subst_bank, subst_prog, preset) = if bank == DRUM_BANK {
                    (DRUM_BANK, 0, library.find_preset(DRUM_BANK, 0))
                } else {
                    match library.find_preset(0, prog) {
                        Some(p) => (0, prog, Some(p)),
                        None => (0, 0, library.find_preset(0, 0)),
                    }
                };
                if preset.is_some() {
                    warn!(
                        "Instrument not found on channel {} [bank={} prog={}], substituted [bank={} prog={}]",
                        chan, bank, prog, subst_bank, subst_prog
                    );
                }
                preset
            })
        };

        let sfont_id = preset.as_ref().map_or(0, |p| p.sfont.id());
        controls.set_sfont_bank_prog(Some(sfont_id), None, Some(prog));
        set_channel_preset(self, chan, preset)
    }

    fn bank_select(&mut self, chan: usize, bank: u32) -> SynthResult<()> {
        ensure(bank <= MAX_BANK, || format!("bank {} out of range", bank))?;
        self.shared()
            .channel(chan)?
            .set_sfont_bank_prog(None, Some(bank), None);
        Ok(())
    }

    /// Pick the SoundFont a following program change on `chan` is meant for
    fn sfont_select(&mut self, chan: usize, sfont_id: u32) -> SynthResult<()> {
        self.shared()
            .channel(chan)?
            .set_sfont_bank_prog(Some(sfont_id), None, None);
        Ok(())
    }

    fn unset_program(&mut self, chan: usize) -> SynthResult<()> {
        self.program_change(chan, PROG_UNSET)
    }

    /// (SoundFont id, bank, program); an unset program reads as 0
    fn get_program(&self, chan: usize) -> SynthResult<(u32, u32, u32)> {
        let (sfont_id, bank, prog) = self.shared().channel(chan)?.sfont_bank_prog();
        let prog = if prog == PROG_UNSET { 0 } else { prog };
        Ok((sfont_id, bank, prog))
    }

    /// Assign a preset from one SoundFont, bypassing the stack search
    fn program_select(&mut self, chan: usize, sfont_id: u32, bank: u32, prog: u32) -> SynthResult<()> {
        let shared = self.shared();
        let controls = shared.channel(chan)?;
        let preset = shared.library().get_preset(sfont_id, bank, prog);
        let Some(preset) = preset else {
            error!(
                "There is no preset with bank number {} and preset number {} in SoundFont {}",
                bank, prog, sfont_id
            );
            return Err(SynthError::NotFound(format!(
                "preset {}:{} in SoundFont {}",
                bank, prog, sfont_id
            )));
        };
        controls.set_sfont_bank_prog(Some(sfont_id), Some(bank), Some(prog));
        set_channel_preset(self, chan, Some(preset))
    }

    fn program_select_by_sfont_name(
        &mut self,
        chan: usize,
        sfont_name: &str,
        bank: u32,
        prog: u32,
    ) -> SynthResult<()> {
        let shared = self.shared();
        let controls = shared.channel(chan)?;
        let preset = shared.library().get_preset_by_name(sfont_name, bank, prog);
        let Some(preset) = preset else {
            error!(
                "There is no preset with bank number {} and preset number {} in SoundFont {}",
                bank, prog, sfont_name
            );
            return Err(SynthError::NotFound(format!(
                "preset {}:{} in SoundFont {}",
                bank, prog, sfont_name
            )));
        };
        controls.set_sfont_bank_prog(Some(preset.sfont.id()), Some(bank), Some(prog));
        set_channel_preset(self, chan, Some(preset))
    }

    /// Re-run the program change of every channel against the current stack
    fn program_reset(&mut self) -> SynthResult<()> {
        for chan in 0..self.shared().channels.len() {
            let (_, _, prog) = self.shared().channels[chan].sfont_bank_prog();
            self.program_change(chan, prog)?;
        }
        Ok(())
    }

    /// Release every voice on `chan`, or on all channels for `None`
    fn all_notes_off(&mut self, chan: Option<usize>) -> SynthResult<()> {
        channel_wide(self, chan, cc::ALL_NOTES_OFF)
    }

    /// Silence every voice on `chan`, or on all channels for `None`
    fn all_sounds_off(&mut self, chan: Option<usize>) -> SynthResult<()> {
        channel_wide(self, chan, cc::ALL_SOUND_OFF)
    }

    /// Silence everything and return every channel to its power-on state
    fn system_reset(&mut self) -> SynthResult<()> {
        self.submit(Command::Midi {
            kind: MidiEventType::SystemReset,
            chan: 0,
            param1: 0,
            param2: 0,
        })
    }

    fn handle_midi_event(&mut self, event: &MidiEvent) -> SynthResult<()> {
        let chan = event.channel;
        match event.kind {
            MidiEventType::NoteOn => self.note_on(chan, event.param1, event.param2),
            MidiEventType::NoteOff => self.note_off(chan, event.param1),
            MidiEventType::ControlChange => self.cc(chan, event.param1, event.param2),
            MidiEventType::ProgramChange => self.program_change(chan, event.param1),
            MidiEventType::ChannelPressure => self.channel_pressure(chan, event.param1),
            MidiEventType::PitchBend => self.pitch_bend(chan, event.param1),
            MidiEventType::KeyPressure => self.shared().channel(chan).map(|_| ()),
            MidiEventType::SystemReset => self.system_reset(),
            MidiEventType::Sysex => self.sysex(&event.sysex, false).map(|_| ()),
        }
    }

    /// Offset a generator for every voice on `chan`
    fn set_gen(&mut self, chan: usize, gen: GenType, value: f32) -> SynthResult<()> {
        self.set_gen2(chan, gen, value, false, false)
    }

    /// Set a generator offset, or an absolute value overriding the instrument's
    ///
    /// A `normalized` value in 0..1 is mapped onto the generator's range.
    fn set_gen2(
        &mut self,
        chan: usize,
        gen: GenType,
        value: f32,
        absolute: bool,
        normalized: bool,
    ) -> SynthResult<()> {
        ensure(value.is_finite(), || format!("{:?} value {} is not finite", gen, value))?;
        let value = if normalized { gen.denormalize(value) } else { value };
        self.shared().channel(chan)?.set_gen(gen, value, absolute);
        self.submit(Command::SetGen {
            chan,
            gen,
            value,
            absolute,
        })
    }

    fn get_gen(&self, chan: usize, gen: GenType) -> SynthResult<f32> {
        Ok(self.shared().channel(chan)?.gen(gen))
    }

    /// Note-off for every voice started with group `id`
    fn stop(&mut self, id: u32) -> SynthResult<()> {
        self.submit(Command::StopVoices(id))
    }

    fn get_channel_info(&self, chan: usize) -> SynthResult<ChannelInfo> {
        Ok(self.shared().channel(chan)?.channel_info())
    }

    /// Master gain, clamped to 0..=10
    fn set_gain(&mut self, gain: f32) -> SynthResult<()> {
        ensure(gain.is_finite(), || format!("gain {} is not finite", gain))?;
        self.shared().gain.store(gain.clamp(0.0, MAX_GAIN));
        self.submit(Command::UpdateGain)
    }

    fn gain(&self) -> f32 {
        self.shared().gain.load()
    }

    /// Lower or raise the number of voices in use, up to the pool size
    fn set_polyphony(&mut self, polyphony: usize) -> SynthResult<()> {
        let capacity = self.shared().settings.polyphony;
        ensure((1..=capacity).contains(&polyphony), || {
            format!("polyphony {} out of range (1..={})", polyphony, capacity)
        })?;
        self.shared().polyphony.store(polyphony, Ordering::Release);
        self.submit(Command::UpdatePolyphony)
    }

    fn polyphony(&self) -> usize {
        self.shared().polyphony.load(Ordering::Acquire)
    }

    /// Voices playing at the end of the last rendered block
    fn active_voice_count(&self) -> usize {
        self.shared().active_voices.load(Ordering::Acquire)
    }

    fn internal_bufsize(&self) -> usize {
        BLOCK_SIZE
    }

    /// Rendering time as a percentage of real time, smoothed
    fn cpu_load(&self) -> f32 {
        self.shared().cpu_load.load()
    }

    /// Update the reverb fields selected by `mask` (0 selects all)
    fn set_reverb(&mut self, mask: u32, params: ReverbParams) -> SynthResult<()> {
        let mask = if mask == 0 { reverb_mask::ALL } else { mask };
        ensure(mask & !reverb_mask::ALL == 0, || format!("invalid reverb mask {:#x}", mask))?;
        ensure(params.is_finite(mask), || format!("non-finite reverb parameter {:?}", params))?;
        let shared = self.shared();
        let mut current = shared.reverb.load();
        current.apply(mask, &params);
        shared.reverb.store(current);
        self.submit(Command::Reverb { mask, params })
    }

    /// Apply one of the five built-in reverb presets
    fn set_reverb_preset(&mut self, num: usize) -> SynthResult<()> {
        let (_, params) = REVERB_PRESETS
            .get(num)
            .ok_or_else(|| SynthError::InvalidArgument(format!("reverb preset {}", num)))?;
        self.set_reverb(reverb_mask::ALL, *params)
    }

    fn reverb_params(&self) -> ReverbParams {
        self.shared().reverb.load()
    }

    fn set_reverb_on(&mut self, on: bool) {
        self.shared().reverb_on.store(on, Ordering::Release);
    }

    fn reverb_on(&self) -> bool {
        self.shared().reverb_on.load(Ordering::Acquire)
    }

    /// Update the chorus fields selected by `mask` (0 selects all)
    fn set_chorus(&mut self, mask: u32, params: ChorusParams) -> SynthResult<()> {
        let mask = if mask == 0 { chorus_mask::ALL } else { mask };
        ensure(mask & !chorus_mask::ALL == 0, || format!("invalid chorus mask {:#x}", mask))?;
        ensure(params.is_finite(mask), || format!("non-finite chorus parameter {:?}", params))?;
        let shared = self.shared();
        let mut current = shared.chorus.load();
        current.apply(mask, &params);
        shared.chorus.store(current);
        self.submit(Command::Chorus { mask, params })
    }

    fn chorus_params(&self) -> ChorusParams {
        self.shared().chorus.load()
    }

    fn set_chorus_on(&mut self, on: bool) {
        self.shared().chorus_on.store(on, Ordering::Release);
    }

    fn chorus_on(&self) -> bool {
        self.shared().chorus_on.load(Ordering::Acquire)
    }

    /// Device id matched by MIDI tuning sysex messages
    fn device_id(&self) -> u8 {
        self.shared().device_id.load(Ordering::Relaxed)
    }

    fn set_device_id(&mut self, id: u32) -> SynthResult<()> {
        let id = data7(id, "device id")?;
        self.shared().device_id.store(id, Ordering::Relaxed);
        Ok(())
    }

    fn midi_channel_count(&self) -> usize {
        self.shared().channels.len()
    }

    /// Process a system exclusive message (without the framing 0xF0/0xF7)
    fn sysex(&mut self, data: &[u8], dryrun: bool) -> SynthResult<SysexReply> {
        sysex::handle(self, data, dryrun)
    }
}

impl<T: Sealed + ?Sized> SynthControl for T {}

/// Publish a channel's new preset and hand it to the renderer
///
/// Must not be called with the library lock held: a command that cannot be
/// queued releases its preset, which takes the lock.
pub(crate) fn set_channel_preset<C: Sealed + ?Sized>(
    ctl: &mut C,
    chan: usize,
    preset: Option<ChannelPreset>,
) -> SynthResult<()> {
    ctl.shared()
        .channel(chan)?
        .set_preset_info(preset.as_ref().map(ChannelPreset::info));
    ctl.submit(Command::SetPreset { chan, preset })
}

/// Re-resolve every channel's (SoundFont, bank, program) after the stack changed
pub(crate) fn update_presets<C: Sealed + ?Sized>(ctl: &mut C) -> SynthResult<()> {
    for chan in 0..ctl.shared().channels.len() {
        let (sfont_id, bank, prog) = ctl.shared().channels[chan].sfont_bank_prog();
        let preset = ctl.shared().library().get_preset(sfont_id, bank, prog);
        set_channel_preset(ctl, chan, preset)?;
    }
    Ok(())
}

fn channel_wide<C: Sealed + ?Sized>(ctl: &mut C, chan: Option<usize>, ctrl: u8) -> SynthResult<()> {
    let chans = match chan {
        Some(chan) => {
            ctl.shared().channel(chan)?;
            chan..chan + 1
        }
        None => 0..ctl.shared().channels.len(),
    };
    for chan in chans {
        ctl.submit(Command::Midi {
            kind: MidiEventType::ControlChange,
            chan,
            param1: ctrl as u32,
            param2: 0,
        })?;
    }
    Ok(())
}
