//! The rendering thread's side of the synth
//!
//! Each internal block runs the same fixed sequence:
//!
//! ```text
//!   drain command queues ─► clear buffers ─► render voices ─► effects ─► advance clock
//!         (apply)              (zero)        (CoreRenderer)   (mix or     (signal return
//!                                                             separate)    thread if needed)
//! ```
//!
//! The `write_*` methods hand out frames from the current block and render a
//! new one whenever it is used up, so callers may ask for any number of frames.

use super::sealed::Sealed;
use super::tuning_api::TuningControl;
use super::{Synth, SynthShared};
use crate::channel::{Channel, ChannelControls};
use crate::command::{ChannelPreset, Command, ReturnEvent};
use crate::core_render::{CoreRenderer, MixBuffers};
use crate::dither::{to_s16, DITHER, DITHER_SIZE};
use crate::error::{ensure, SynthError, SynthResult};
use crate::fx::{
    ChorusParams, ChorusUnit, FxMode, ModulatedChorus, ReverbParams, ReverbUnit, SchroederReverb,
};
use crate::generator::{GenSet, GenType};
use crate::midi::{cc, rpn, MidiEventType, NRPN_SOUNDFONT_MSB};
use crate::return_queue::{self, Reclaimer};
use crate::sfont::Preset;
use crate::tuning::Tuning;
use crate::voice::{Sample, VoiceInfo, BLOCK_SIZE};
use crate::voice_pool::VoicePool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What a preset sees while starting the voices of one note
pub struct NoteOnContext<'a> {
    pool: &'a VoicePool,
    channel: &'a Channel,
    id: u32,
    tick: u64,
    gain: f32,
    voices_started: usize,
}

impl NoteOnContext<'_> {
    pub fn chan(&self) -> usize {
        self.channel.num()
    }

    /// Id shared by every voice of this note
    pub fn note_id(&self) -> u32 {
        self.id
    }

    pub fn voices_started(&self) -> usize {
        self.voices_started
    }

    /// Allocate (or steal) a voice and start it playing `sample`
    ///
    /// Other voices on the channel in the same nonzero exclusive class are
    /// silenced before the new one starts.
    pub fn start_voice(
        &mut self,
        key: u8,
        vel: u8,
        sample: &Arc<Sample>,
        gens: &GenSet,
    ) -> SynthResult<()> {
        let chan = self.channel.num();
        let Some(index) = self.pool.allocate(self.id) else {
            warn!(
                "Failed to allocate a synthesis process. (chan={},key={})",
                chan, key
            );
            return Err(SynthError::NoVoice);
        };

        let class = {
            let mut voice = self.pool.lock(index);
            voice.init(
                Arc::clone(sample),
                *gens,
                chan,
                key,
                vel,
                self.id,
                self.tick,
                self.gain,
            );
            voice.exclusive_class()
        };
        self.pool.kill_by_exclusive_class(chan, class, self.id);

        let controls = self.channel.controls();
        self.pool
            .lock(index)
            .start(controls, self.channel.tuning().map(Arc::as_ref));
        self.voices_started += 1;
        Ok(())
    }
}

/// Rendering token: owns the voices and applies commands
///
/// Exactly one thread renders at a time, and that thread owns the `Renderer`.
/// Control operations called on it take effect immediately.
pub struct Renderer {
    shared: Arc<SynthShared>,
    pool: Arc<VoicePool>,
    channels: Vec<Channel>,
    cores: CoreRenderer,
    buffers: MixBuffers,
    reverb: Box<dyn ReverbUnit>,
    chorus: Box<dyn ChorusUnit>,
    reverb_params: ReverbParams,
    chorus_params: ChorusParams,
    ticks: u64,
    note_id: u32,
    // Next frame to hand out from the current block
    cur: usize,
    dither_index: usize,
    _reclaimer: Reclaimer,
}

impl Renderer {
    pub(crate) fn new(shared: Arc<SynthShared>) -> SynthResult<Self> {
        let settings = &shared.settings;
        let pool = Arc::new(VoicePool::new(settings.polyphony, settings.sample_rate));
        let cores = CoreRenderer::new(
            Arc::clone(&pool),
            settings.cpu_cores,
            settings.pin_core_threads,
        )?;
        let channels = shared
            .channels
            .iter()
            .map(|controls| Channel::new(Arc::clone(controls)))
            .collect();

        let reverb_params = settings.reverb;
        let chorus_params = settings.chorus;
        let mut reverb = SchroederReverb::new(settings.sample_rate);
        reverb.set_params(&reverb_params);
        let mut chorus = ModulatedChorus::new(settings.sample_rate);
        chorus.set_params(&chorus_params);
        let buffers = MixBuffers::new(settings.audio_groups);
        let reclaimer = Reclaimer::spawn(Arc::clone(&shared))?;

        Ok(Self {
            shared,
            pool,
            channels,
            cores,
            buffers,
            reverb: Box::new(reverb),
            chorus: Box::new(chorus),
            reverb_params,
            chorus_params,
            ticks: 0,
            note_id: 0,
            cur: BLOCK_SIZE,
            dither_index: 0,
            _reclaimer: reclaimer,
        })
    }

    /// A control handle for other threads
    pub fn synth(&self) -> Synth {
        Synth::from_shared(Arc::clone(&self.shared))
    }

    /// Frames rendered since the synth was created
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Buffers of the most recently rendered block
    pub fn buffers(&self) -> &MixBuffers {
        &self.buffers
    }

    /// Replace the reverb unit; it receives the current parameters
    pub fn set_reverb_unit(&mut self, mut unit: Box<dyn ReverbUnit>) {
        unit.set_params(&self.reverb_params);
        self.reverb = unit;
    }

    /// Replace the chorus unit; it receives the current parameters
    pub fn set_chorus_unit(&mut self, mut unit: Box<dyn ChorusUnit>) {
        unit.set_params(&self.chorus_params);
        self.chorus = unit;
    }

    /// Start the voices of `preset` as group `id` without releasing earlier notes
    pub fn start(
        &mut self,
        id: u32,
        preset: &dyn Preset,
        chan: usize,
        key: u32,
        vel: u32,
    ) -> SynthResult<()> {
        ensure(key < 128, || format!("key {} out of range", key))?;
        ensure((1..=127).contains(&vel), || format!("velocity {} out of range", vel))?;
        let channel = self.channels.get(chan).ok_or_else(|| {
            SynthError::InvalidArgument(format!("channel {} out of range", chan))
        })?;
        let mut ctx = NoteOnContext {
            pool: &self.pool,
            channel,
            id,
            tick: self.ticks,
            gain: self.shared.gain.load(),
            voices_started: 0,
        };
        preset.note_on(&mut ctx, key as u8, vel as u8)
    }

    /// Voices of group `id`, or every playing voice for `None`
    pub fn voice_list(&self, id: Option<u32>) -> Vec<VoiceInfo> {
        self.pool.voice_list(id)
    }

    /// Snapshot of the voice in pool slot `index`
    pub fn voice_info(&self, index: usize) -> Option<VoiceInfo> {
        self.pool.info(index)
    }

    /// Number of cores rendering voices, this thread included
    pub fn cores(&self) -> usize {
        self.cores.cores()
    }

    /// Render into planar stereo buffers of equal length
    pub fn write_float(&mut self, left: &mut [f32], right: &mut [f32]) -> SynthResult<()> {
        ensure(left.len() == right.len(), || {
            format!("buffer lengths differ ({} and {})", left.len(), right.len())
        })?;
        self.write_frames(left.len(), false, |i, buffers, cur| {
            let (l, r) = fold_groups(buffers, 0, 1, cur);
            left[i] = l;
            right[i] = r;
        });
        Ok(())
    }

    /// Render into one interleaved stereo buffer
    pub fn write_float_interleaved(&mut self, out: &mut [f32]) -> SynthResult<()> {
        ensure(out.len() % 2 == 0, || "interleaved buffer length is odd".to_string())?;
        self.write_frames(out.len() / 2, false, |i, buffers, cur| {
            let (l, r) = fold_groups(buffers, 0, 1, cur);
            out[2 * i] = l;
            out[2 * i + 1] = r;
        });
        Ok(())
    }

    /// Render into several stereo pairs, optionally with separate effect outputs
    ///
    /// Audio group `g` goes to pair `g % lefts.len()`. When effect buffers are
    /// given (index 0 reverb, 1 chorus) the effects are written there instead
    /// of being mixed into the first pair.
    pub fn nwrite_float(
        &mut self,
        lefts: &mut [&mut [f32]],
        rights: &mut [&mut [f32]],
        mut fx_lefts: Option<&mut [&mut [f32]]>,
        mut fx_rights: Option<&mut [&mut [f32]]>,
    ) -> SynthResult<()> {
        ensure(!lefts.is_empty() && lefts.len() == rights.len(), || {
            format!("{} left and {} right buffers", lefts.len(), rights.len())
        })?;
        let frames = lefts[0].len();
        let all_sized = lefts
            .iter()
            .chain(rights.iter())
            .chain(fx_lefts.iter().flat_map(|b| b.iter()))
            .chain(fx_rights.iter().flat_map(|b| b.iter()))
            .all(|buf| buf.len() == frames);
        ensure(all_sized, || "output buffers differ in length".to_string())?;
        let fx_pairs = match (&fx_lefts, &fx_rights) {
            (Some(l), Some(r)) => l.len().min(r.len()).min(2),
            _ => 0,
        };
        let separate_fx = fx_pairs > 0;
        let pairs = lefts.len();

        self.write_frames(frames, separate_fx, |i, buffers, cur| {
            for (pair, (left, right)) in lefts.iter_mut().zip(rights.iter_mut()).enumerate() {
                let (l, r) = fold_groups(buffers, pair, pairs, cur);
                left[i] = l;
                right[i] = r;
            }
            if let (Some(fl), Some(fr)) = (fx_lefts.as_deref_mut(), fx_rights.as_deref_mut()) {
                for fx in 0..fx_pairs {
                    fl[fx][i] = buffers.fx_left[fx][cur];
                    fr[fx][i] = buffers.fx_right[fx][cur];
                }
            }
        });
        Ok(())
    }

    /// Render 16-bit planar stereo with dither
    pub fn write_s16(&mut self, left: &mut [i16], right: &mut [i16]) -> SynthResult<()> {
        ensure(left.len() == right.len(), || {
            format!("buffer lengths differ ({} and {})", left.len(), right.len())
        })?;
        let mut di = self.dither_index;
        self.write_frames(left.len(), false, |i, buffers, cur| {
            let (l, r) = fold_groups(buffers, 0, 1, cur);
            left[i] = to_s16(l, DITHER[0][di]);
            right[i] = to_s16(r, DITHER[1][di]);
            di = (di + 1) % DITHER_SIZE;
        });
        self.dither_index = di;
        Ok(())
    }

    /// Render 16-bit interleaved stereo with dither
    pub fn write_s16_interleaved(&mut self, out: &mut [i16]) -> SynthResult<()> {
        ensure(out.len() % 2 == 0, || "interleaved buffer length is odd".to_string())?;
        let mut di = self.dither_index;
        self.write_frames(out.len() / 2, false, |i, buffers, cur| {
            let (l, r) = fold_groups(buffers, 0, 1, cur);
            out[2 * i] = to_s16(l, DITHER[0][di]);
            out[2 * i + 1] = to_s16(r, DITHER[1][di]);
            di = (di + 1) % DITHER_SIZE;
        });
        self.dither_index = di;
        Ok(())
    }

    fn write_frames(
        &mut self,
        frames: usize,
        separate_fx: bool,
        mut emit: impl FnMut(usize, &MixBuffers, usize),
    ) {
        let start = Instant::now();
        for i in 0..frames {
            if self.cur >= BLOCK_SIZE {
                self.render_block(separate_fx);
                self.cur = 0;
            }
            emit(i, &self.buffers, self.cur);
            self.cur += 1;
        }
        self.update_cpu_load(start, frames);
    }

    fn update_cpu_load(&self, start: Instant, frames: usize) {
        if frames == 0 {
            return;
        }
        let micros = start.elapsed().as_secs_f64() * 1e6;
        let load = micros * self.shared.settings.sample_rate / frames as f64 / 10000.0;
        let prev = self.shared.cpu_load.load() as f64;
        self.shared.cpu_load.store((0.5 * (prev + load)) as f32);
    }

    /// Synthesize one internal block
    fn render_block(&mut self, separate_fx: bool) {
        let queues = Arc::clone(&self.shared.queues);
        queues.drain(|cmd| {
            if let Err(e) = self.apply(cmd) {
                debug!("Queued command failed: {}", e);
            }
        });

        self.buffers.clear();
        let reverb_on = self.shared.reverb_on.load(Ordering::Acquire);
        let chorus_on = self.shared.chorus_on.load(Ordering::Acquire);
        self.cores.render(&mut self.buffers, reverb_on, chorus_on);

        let mode = if separate_fx { FxMode::Replace } else { FxMode::Mix };
        let b = &mut self.buffers;
        if reverb_on {
            let (left, right) = if separate_fx {
                (&mut b.fx_left[0], &mut b.fx_right[0])
            } else {
                (&mut b.left[0], &mut b.right[0])
            };
            self.reverb.process(&b.reverb_send, left, right, mode);
        }
        if chorus_on {
            let (left, right) = if separate_fx {
                (&mut b.fx_left[1], &mut b.fx_right[1])
            } else {
                (&mut b.left[0], &mut b.right[0])
            };
            self.chorus.process(&b.chorus_send, left, right, mode);
        }

        self.ticks += BLOCK_SIZE as u64;
        self.shared
            .active_voices
            .store(self.pool.active_count(), Ordering::Release);
        if !self.shared.returns.is_empty() {
            self.shared.returns.signal();
        }
    }

    fn post(&self, event: ReturnEvent) {
        return_queue::post_or_reclaim(&self.shared, event);
    }

    fn controls(&self, chan: usize) -> Arc<ChannelControls> {
        Arc::clone(&self.shared.channels[chan])
    }

    /// Apply one command to the synthesis state
    fn apply(&mut self, cmd: Command) -> SynthResult<()> {
        if let Some(chan) = cmd.channel().filter(|&c| c >= self.channels.len()) {
            if let Some(event) = cmd.into_release() {
                self.post(event);
            }
            return Err(SynthError::InvalidArgument(format!(
                "channel {} out of range",
                chan
            )));
        }

        match cmd {
            Command::Midi {
                kind,
                chan,
                param1,
                param2,
            } => self.midi_local(kind, chan, param1, param2),
            Command::SetGen {
                chan,
                gen,
                value,
                absolute,
            } => {
                self.set_gen_local(chan, gen, value, absolute);
                Ok(())
            }
            Command::UpdateGain => {
                let gain = self.shared.gain.load();
                self.pool.for_each_playing(|voice| {
                    voice.set_gain(gain);
                    true
                });
                Ok(())
            }
            Command::UpdatePolyphony => {
                self.pool
                    .set_polyphony(self.shared.polyphony.load(Ordering::Acquire));
                Ok(())
            }
            Command::StopVoices(id) => {
                let channels = &self.channels;
                self.pool.stop(id, |chan| {
                    channels
                        .get(chan)
                        .is_some_and(|c| c.controls().sustain_down())
                });
                Ok(())
            }
            Command::SetPreset { chan, preset } => {
                self.set_preset_local(chan, preset);
                Ok(())
            }
            Command::Reverb { mask, params } => {
                self.reverb_params.apply(mask, &params);
                self.reverb.set_params(&self.reverb_params);
                self.post(ReturnEvent::ReverbSync { mask, params });
                Ok(())
            }
            Command::Chorus { mask, params } => {
                self.chorus_params.apply(mask, &params);
                self.chorus.set_params(&self.chorus_params);
                self.post(ReturnEvent::ChorusSync { mask, params });
                Ok(())
            }
            Command::SetTuning {
                chan,
                tuning,
                apply,
            } => {
                let old = self.channels[chan].set_tuning(tuning);
                if apply {
                    self.modulate_channel(chan);
                }
                if let Some(old) = old {
                    self.post(ReturnEvent::UnrefTuning {
                        tuning: old,
                        count: 1,
                    });
                }
                Ok(())
            }
            Command::ReplaceTuning { old, new, apply } => {
                self.replace_tuning_local(old, new, apply);
                Ok(())
            }
        }
    }

    fn midi_local(
        &mut self,
        kind: MidiEventType,
        chan: usize,
        param1: u32,
        param2: u32,
    ) -> SynthResult<()> {
        match kind {
            MidiEventType::NoteOn => self.note_on_local(chan, param1 as u8, param2 as u8),
            MidiEventType::NoteOff => {
                self.note_off_local(chan, param1 as u8);
                Ok(())
            }
            MidiEventType::ControlChange => self.cc_local(chan, param1 as u8, param2 as u8),
            MidiEventType::ChannelPressure | MidiEventType::PitchBend => {
                self.modulate_channel(chan);
                Ok(())
            }
            MidiEventType::SystemReset => {
                self.system_reset_local();
                Ok(())
            }
            // Resolved before queueing or not voice related
            MidiEventType::ProgramChange | MidiEventType::KeyPressure | MidiEventType::Sysex => {
                Ok(())
            }
        }
    }

    fn note_on_local(&mut self, chan: usize, key: u8, vel: u8) -> SynthResult<()> {
        if vel == 0 {
            self.note_off_local(chan, key);
            return Ok(());
        }

        let channel = &self.channels[chan];
        let Some(preset) = channel.preset() else {
            if self.shared.verbose() {
                info!(
                    "noteon\t{}\t{}\t{}\t{:05}\t{:.3}\t{}",
                    chan,
                    key,
                    vel,
                    0,
                    self.seconds(),
                    "channel has no preset"
                );
            }
            return Err(SynthError::NoPreset(chan));
        };

        let id = self.note_id;
        self.note_id = self.note_id.wrapping_add(1);
        self.pool
            .release_on_same_note(chan, key, id, channel.controls().sustain_down());

        if self.shared.verbose() {
            info!(
                "noteon\t{}\t{}\t{}\t{:05}\t{:.3}",
                chan,
                key,
                vel,
                id,
                self.seconds()
            );
        }

        let mut ctx = NoteOnContext {
            pool: &self.pool,
            channel,
            id,
            tick: self.ticks,
            gain: self.shared.gain.load(),
            voices_started: 0,
        };
        preset.preset.note_on(&mut ctx, key, vel)
    }

    fn note_off_local(&mut self, chan: usize, key: u8) {
        let sustain_down = self.channels[chan].controls().sustain_down();
        let released = self.pool.note_off(chan, key, sustain_down);
        if self.shared.verbose() {
            info!(
                "noteoff\t{}\t{}\t{:.3}\t{}",
                chan,
                key,
                self.seconds(),
                released
            );
        }
    }

    /// Controller side effects; the value itself is already stored
    fn cc_local(&mut self, chan: usize, num: u8, value: u8) -> SynthResult<()> {
        let controls = self.controls(chan);
        match num {
            cc::SUSTAIN_SWITCH => {
                if value < 64 {
                    self.pool.damp(chan);
                }
            }
            cc::BANK_SELECT_MSB | cc::BANK_SELECT_LSB => {}
            cc::ALL_SOUND_OFF => {
                self.pool.all_sounds_off(Some(chan));
            }
            cc::ALL_CTRL_OFF => {
                controls.init_ctrl(true);
                self.modulate_channel(chan);
            }
            cc::ALL_NOTES_OFF => {
                self.pool.all_notes_off(Some(chan));
            }
            cc::DATA_ENTRY_MSB => self.data_entry(chan, &controls, value)?,
            cc::NRPN_MSB => {
                controls.set_cc(cc::NRPN_LSB, 0);
                controls.set_nrpn_select(0);
            }
            cc::NRPN_LSB => {
                if controls.cc(cc::NRPN_MSB) == NRPN_SOUNDFONT_MSB {
                    let step = match value {
                        100 => 100,
                        101 => 1000,
                        102 => 10000,
                        v if v < 100 => v as i32,
                        _ => 0,
                    };
                    controls.set_nrpn_select(controls.nrpn_select() + step);
                }
                controls.set_nrpn_active(true);
            }
            cc::RPN_MSB | cc::RPN_LSB => controls.set_nrpn_active(false),
            _ => self.modulate_channel(chan),
        }
        Ok(())
    }

    fn data_entry(&mut self, chan: usize, controls: &ChannelControls, value: u8) -> SynthResult<()> {
        let data = ((value as u32) << 7) | controls.cc(cc::DATA_ENTRY_LSB) as u32;

        if controls.nrpn_active() {
            let soundfont_nrpn = controls.cc(cc::NRPN_MSB) == NRPN_SOUNDFONT_MSB
                && controls.cc(cc::NRPN_LSB) < 100;
            if soundfont_nrpn {
                let gen = usize::try_from(controls.nrpn_select())
                    .ok()
                    .and_then(GenType::from_index);
                if let Some(gen) = gen {
                    self.set_gen_local(chan, gen, gen.scale_nrpn(data), false);
                }
                controls.set_nrpn_select(0);
            }
            return Ok(());
        }

        if controls.cc(cc::RPN_MSB) != 0 {
            return Ok(());
        }
        match controls.cc(cc::RPN_LSB) as u16 {
            rpn::PITCH_BEND_RANGE => {
                controls.set_pitch_wheel_sensitivity(value);
                self.modulate_channel(chan);
            }
            rpn::CHANNEL_FINE_TUNE => {
                let cents = (data as f32 - 8192.0) / 8192.0 * 50.0;
                self.set_gen_local(chan, GenType::FineTune, cents, false);
            }
            rpn::CHANNEL_COARSE_TUNE => {
                self.set_gen_local(chan, GenType::CoarseTune, value as f32 - 64.0, false);
            }
            rpn::TUNING_PROGRAM_CHANGE => {
                controls.set_tuning_prog(value);
                let (bank, prog) = controls.tuning_selection();
                self.activate_tuning(chan, bank as u32, prog as u32, true)?;
            }
            rpn::TUNING_BANK_SELECT => controls.set_tuning_bank(value),
            _ => {}
        }
        Ok(())
    }

    fn set_gen_local(&mut self, chan: usize, gen: GenType, value: f32, absolute: bool) {
        self.channels[chan].controls().set_gen(gen, value, absolute);
        self.modulate_channel(chan);
    }

    /// Recompute the parameters of every voice on `chan`
    fn modulate_channel(&self, chan: usize) {
        let channel = &self.channels[chan];
        let tuning = channel.tuning().map(Arc::as_ref);
        self.pool.for_each_playing(|voice| {
            if voice.chan() == chan {
                voice.update(channel.controls(), tuning);
                true
            } else {
                false
            }
        });
    }

    fn set_preset_local(&mut self, chan: usize, preset: Option<ChannelPreset>) {
        if let Some(old) = self.channels[chan].set_preset(preset) {
            self.post(ReturnEvent::FreePreset(old));
        }
    }

    /// Move every channel using `old` to `new`, settling the references
    fn replace_tuning_local(&mut self, old: Arc<Tuning>, new: Arc<Tuning>, apply: bool) {
        let mut moved = Vec::new();
        for channel in self.channels.iter_mut() {
            if channel.has_tuning(&old) {
                new.add_ref();
                channel.set_tuning(Some(Arc::clone(&new)));
                moved.push(channel.num());
            }
        }
        if apply {
            for &chan in &moved {
                self.modulate_channel(chan);
            }
        }

        if !moved.is_empty() {
            self.post(ReturnEvent::UnrefTuning {
                tuning: old,
                count: moved.len() as i32,
            });
        }
        // The command's own reference
        self.post(ReturnEvent::UnrefTuning {
            tuning: new,
            count: 1,
        });
    }

    /// Silence every voice and return every channel to its power-on state
    fn system_reset_local(&mut self) {
        self.pool.all_sounds_off(None);

        for chan in 0..self.channels.len() {
            let controls = self.controls(chan);
            controls.init();
            let (_, bank, prog) = controls.sfont_bank_prog();
            let preset = self.shared.library().find_preset(bank, prog);
            let sfont_id = preset.as_ref().map_or(0, |p| p.sfont.id());
            controls.set_sfont_bank_prog(Some(sfont_id), None, None);
            controls.set_preset_info(preset.as_ref().map(ChannelPreset::info));

            self.set_preset_local(chan, preset);
            if let Some(old) = self.channels[chan].set_tuning(None) {
                self.post(ReturnEvent::UnrefTuning {
                    tuning: old,
                    count: 1,
                });
            }
        }

        self.reverb.reset();
        self.chorus.reset();
        debug!("System reset");
    }

    fn seconds(&self) -> f64 {
        self.ticks as f64 / self.shared.settings.sample_rate
    }
}

impl Sealed for Renderer {
    fn shared(&self) -> &SynthShared {
        &self.shared
    }

    fn submit(&mut self, cmd: Command) -> SynthResult<()> {
        self.apply(cmd)
    }
}

/// Sum of the audio groups that feed output pair `pair` of `pairs`
#[inline]
fn fold_groups(buffers: &MixBuffers, pair: usize, pairs: usize, cur: usize) -> (f32, f32) {
    let mut l = 0.0;
    let mut r = 0.0;
    for group in (pair..buffers.groups()).step_by(pairs.max(1)) {
        l += buffers.left[group][cur];
        r += buffers.right[group][cur];
    }
    (l, r)
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("ticks", &self.ticks)
            .field("cores", &self.cores.cores())
            .field("active_voices", &self.pool.active_count())
            .finish()
    }
}
