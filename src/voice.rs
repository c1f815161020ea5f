//! Synthesis voice: one sample stream with a volume envelope
//!
//! A voice is created once at startup and reused for its whole life. Between
//! notes it sits in [`VoiceState::Idle`] or [`VoiceState::Off`]. A note-on moves
//! it to [`VoiceState::Sounding`]; a note-off moves it to `Released` (or
//! `Sustained` while the sustain pedal is held) and the envelope's release
//! section finally brings it back to `Off`.
//!
//! All parameters that depend on channel state (volume, pan, pitch, sends) are
//! computed when the voice starts or is modulated, so rendering a voice only
//! touches the voice itself. That is what lets core workers render voices in
//! parallel without looking at channels.

use crate::channel::ChannelControls;
use crate::generator::{GenSet, GenType};
use crate::midi::cc;
use crate::tuning::Tuning;
use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

/// Frames rendered per internal block
pub const BLOCK_SIZE: usize = 64;

/// PCM sample data referenced by presets and voices
#[derive(Debug, Clone)]
pub struct Sample {
    pub name: String,
    pub data: Vec<f32>,
    /// Rate the sample was recorded at
    pub sample_rate: f64,
    /// MIDI key at which the sample plays at its recorded pitch
    pub root_key: u8,
    /// Pitch correction in cents
    pub pitch_correction: i32,
    /// Loop start and end (end exclusive); `None` plays once
    pub loop_range: Option<(usize, usize)>,
}

impl Sample {
    /// A looped single-cycle sine wave of `len` samples
    ///
    /// The recorded rate is chosen so the root key plays at `freq`.
    pub fn sine(name: &str, len: usize, root_key: u8, freq: f64) -> Self {
        let len = len.max(2);
        let data = (0..len)
            .map(|i| (2.0 * std::f64::consts::PI * i as f64 / len as f64).sin() as f32)
            .collect();
        Self {
            name: name.to_string(),
            data,
            sample_rate: len as f64 * freq,
            root_key,
            pitch_correction: 0,
            loop_range: Some((0, len)),
        }
    }
}

/// Voice lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Never used since startup
    Idle,
    /// Key held
    Sounding,
    /// Key released while the sustain pedal is down
    Sustained,
    /// Key released, envelope in its release section
    Released,
    /// Silent and available for reuse
    Off,
}

impl VoiceState {
    pub fn is_playing(self) -> bool {
        matches!(
            self,
            VoiceState::Sounding | VoiceState::Sustained | VoiceState::Released
        )
    }

    pub fn is_available(self) -> bool {
        matches!(self, VoiceState::Idle | VoiceState::Off)
    }
}

/// Volume envelope section
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EnvelopeSection {
    Delay,
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
    Finished,
}

/// Convert timecents to a whole number of frames (at least one)
fn timecents_to_frames(tc: f32, rate: f64) -> u32 {
    let secs = 2f64.powf(tc as f64 / 1200.0);
    ((secs * rate).round() as u32).max(1)
}

/// Convert centibels of attenuation to linear amplitude
fn cb_to_amp(cb: f32) -> f32 {
    10f32.powf(-cb / 200.0)
}

/// Linear DAHDSR volume envelope
#[derive(Debug, Clone)]
struct VolumeEnvelope {
    section: EnvelopeSection,
    amp: f32,
    // Frames left in the current timed section
    remaining: u32,
    delay: u32,
    attack: u32,
    hold: u32,
    decay: u32,
    sustain_level: f32,
    release: u32,
    release_step: f32,
}

impl VolumeEnvelope {
    fn new() -> Self {
        Self {
            section: EnvelopeSection::Finished,
            amp: 0.0,
            remaining: 0,
            delay: 1,
            attack: 1,
            hold: 1,
            decay: 1,
            sustain_level: 1.0,
            release: 1,
            release_step: 1.0,
        }
    }

    fn configure(&mut self, gen: impl Fn(GenType) -> f32, rate: f64) {
        self.delay = timecents_to_frames(gen(GenType::DelayVolEnv), rate);
        self.attack = timecents_to_frames(gen(GenType::AttackVolEnv), rate);
        self.hold = timecents_to_frames(gen(GenType::HoldVolEnv), rate);
        self.decay = timecents_to_frames(gen(GenType::DecayVolEnv), rate);
        self.sustain_level = cb_to_amp(gen(GenType::SustainVolEnv));
        self.release = timecents_to_frames(gen(GenType::ReleaseVolEnv), rate);
    }

    fn start(&mut self) {
        self.amp = 0.0;
        self.enter(EnvelopeSection::Delay);
    }

    fn enter(&mut self, section: EnvelopeSection) {
        self.section = section;
        self.remaining = match section {
            EnvelopeSection::Delay => self.delay,
            EnvelopeSection::Attack => self.attack,
            EnvelopeSection::Hold => self.hold,
            EnvelopeSection::Decay => self.decay,
            EnvelopeSection::Release => {
                self.release_step = self.amp / self.release as f32;
                self.release
            }
            EnvelopeSection::Sustain | EnvelopeSection::Finished => 0,
        };
    }

    fn release(&mut self) {
        if self.section < EnvelopeSection::Release {
            self.enter(EnvelopeSection::Release);
        }
    }

    /// Advance one frame and return the amplitude for it
    #[inline]
    fn next(&mut self) -> f32 {
        match self.section {
            EnvelopeSection::Delay => {
                self.amp = 0.0;
                self.tick(EnvelopeSection::Attack);
            }
            EnvelopeSection::Attack => {
                self.amp = (self.amp + 1.0 / self.attack as f32).min(1.0);
                self.tick(EnvelopeSection::Hold);
            }
            EnvelopeSection::Hold => {
                self.amp = 1.0;
                self.tick(EnvelopeSection::Decay);
            }
            EnvelopeSection::Decay => {
                let step = (1.0 - self.sustain_level) / self.decay as f32;
                self.amp = (self.amp - step).max(self.sustain_level);
                self.tick(EnvelopeSection::Sustain);
            }
            EnvelopeSection::Sustain => {
                self.amp = self.sustain_level;
            }
            EnvelopeSection::Release => {
                self.amp = (self.amp - self.release_step).max(0.0);
                self.tick(EnvelopeSection::Finished);
            }
            EnvelopeSection::Finished => {
                self.amp = 0.0;
            }
        }
        self.amp
    }

    #[inline]
    fn tick(&mut self, next: EnvelopeSection) {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.enter(next);
        }
    }
}

/// Snapshot of a voice for inspection
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceInfo {
    pub id: u32,
    pub chan: usize,
    pub key: u8,
    pub vel: u8,
    pub state: VoiceState,
    pub exclusive_class: i32,
    pub start_tick: u64,
    pub envelope_section: EnvelopeSection,
    pub envelope_amp: f32,
    /// Phase increment per output frame (sample frames)
    pub phase_increment: f64,
    /// Number of times the voice has been rendered since it started
    pub render_count: u64,
}

/// One synthesis voice
#[derive(Debug)]
pub struct Voice {
    id: u32,
    chan: usize,
    key: u8,
    vel: u8,
    state: VoiceState,
    start_tick: u64,
    output_rate: f64,

    sample: Option<Arc<Sample>>,
    gens: GenSet,
    envelope: VolumeEnvelope,
    phase: f64,
    phase_incr: f64,

    // Mix parameters
    gain: f32,
    amp: f32,
    pan_left: f32,
    pan_right: f32,
    reverb_send: f32,
    chorus_send: f32,

    buf: [f32; BLOCK_SIZE],
    render_count: u64,
}

impl Voice {
    pub fn new(output_rate: f64) -> Self {
        Self {
            id: 0,
            chan: 0,
            key: 0,
            vel: 0,
            state: VoiceState::Idle,
            start_tick: 0,
            output_rate,
            sample: None,
            gens: GenSet::default(),
            envelope: VolumeEnvelope::new(),
            phase: 0.0,
            phase_incr: 0.0,
            gain: 1.0,
            amp: 0.0,
            pan_left: 0.0,
            pan_right: 0.0,
            reverb_send: 0.0,
            chorus_send: 0.0,
            buf: [0.0; BLOCK_SIZE],
            render_count: 0,
        }
    }

    /// Prepare the voice for a new note; [`Voice::start`] makes it audible
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        &mut self,
        sample: Arc<Sample>,
        gens: GenSet,
        chan: usize,
        key: u8,
        vel: u8,
        id: u32,
        start_tick: u64,
        gain: f32,
    ) {
        self.sample = Some(sample);
        self.gens = gens;
        self.chan = chan;
        self.key = key;
        self.vel = vel;
        self.id = id;
        self.start_tick = start_tick;
        self.gain = gain;
        self.phase = 0.0;
        self.render_count = 0;
        self.buf = [0.0; BLOCK_SIZE];
    }

    /// Compute parameters from channel state and enter the attack phase
    pub fn start(&mut self, controls: &ChannelControls, tuning: Option<&Tuning>) {
        let envelope_gen = |g: GenType| controls.effective_gen(g, self.gens.get(g));
        self.envelope.configure(envelope_gen, self.output_rate);
        self.envelope.start();
        self.state = VoiceState::Sounding;
        self.update(controls, tuning);
    }

    /// Recompute mix and pitch parameters after a channel change
    pub fn update(&mut self, controls: &ChannelControls, tuning: Option<&Tuning>) {
        let gen = |g: GenType| controls.effective_gen(g, self.gens.get(g));

        // Amplitude: velocity, generator attenuation, volume and expression
        let vel = self.vel as f32 / 127.0;
        let volume = controls.cc(cc::VOLUME_MSB) as f32 / 127.0;
        let expression = controls.cc(cc::EXPRESSION_MSB) as f32 / 127.0;
        self.amp = vel * vel * cb_to_amp(gen(GenType::Attenuation)) * volume * volume
            * expression
            * expression;

        // Equal-power pan, generator pan plus CC10
        let cc_pan = (controls.cc(cc::PAN_MSB) as f32 - 64.0) / 64.0 * 500.0;
        let pan = (gen(GenType::Pan) + cc_pan).clamp(-500.0, 500.0);
        let angle = (pan + 500.0) / 1000.0 * FRAC_PI_2;
        self.pan_left = angle.cos();
        self.pan_right = angle.sin();

        // Effect sends: generator plus CC91/CC93 (up to 20%)
        let cc_reverb = controls.cc(91) as f32 / 127.0 * 200.0;
        let cc_chorus = controls.cc(93) as f32 / 127.0 * 200.0;
        self.reverb_send = ((gen(GenType::ReverbSend) + cc_reverb) / 1000.0).clamp(0.0, 1.0);
        self.chorus_send = ((gen(GenType::ChorusSend) + cc_chorus) / 1000.0).clamp(0.0, 1.0);

        self.update_pitch(controls, tuning);
    }

    fn update_pitch(&mut self, controls: &ChannelControls, tuning: Option<&Tuning>) {
        let Some(sample) = self.sample.as_ref() else {
            return;
        };
        let gen = |g: GenType| controls.effective_gen(g, self.gens.get(g));
        let scale_tune = gen(GenType::ScaleTune) as f64;
        let key = self.key as usize;

        let key_pitch = match tuning {
            Some(t) => t.pitch(60) + scale_tune / 100.0 * (t.pitch(key) - t.pitch(60)),
            None => scale_tune * (key as f64 - 60.0) + 6000.0,
        };

        let bend = (controls.pitch_bend() as f64 - 8192.0) / 8192.0
            * controls.pitch_wheel_sensitivity() as f64
            * 100.0;
        let pitch = key_pitch
            + gen(GenType::CoarseTune) as f64 * 100.0
            + gen(GenType::FineTune) as f64
            + bend;

        let override_root = self.gens.get(GenType::OverrideRootKey);
        let root_key = if override_root >= 0.0 {
            override_root as f64
        } else {
            sample.root_key as f64
        };
        let root_pitch = root_key * 100.0 - sample.pitch_correction as f64;

        self.phase_incr =
            2f64.powf((pitch - root_pitch) / 1200.0) * sample.sample_rate / self.output_rate;
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    /// Key released: sustain if the pedal is down, otherwise release
    pub fn note_off(&mut self, sustain_down: bool) {
        if self.state != VoiceState::Sounding {
            return;
        }
        if sustain_down {
            self.state = VoiceState::Sustained;
        } else {
            self.release();
        }
    }

    /// Enter the release section
    pub fn release(&mut self) {
        if self.state.is_playing() {
            self.state = VoiceState::Released;
            self.envelope.release();
        }
    }

    /// Silence immediately
    pub fn off(&mut self) {
        if self.state != VoiceState::Idle {
            self.state = VoiceState::Off;
        }
        self.envelope.section = EnvelopeSection::Finished;
        self.envelope.amp = 0.0;
    }

    /// Render one block into the voice's own buffer
    ///
    /// Returns the number of frames produced before the voice finished; the
    /// rest of the buffer is silence.
    pub fn write(&mut self) -> usize {
        self.buf = [0.0; BLOCK_SIZE];
        if !self.state.is_playing() {
            return 0;
        }
        let Some(sample) = self.sample.clone() else {
            self.off();
            return 0;
        };
        if !self.phase_incr.is_finite() {
            self.off();
            return 0;
        }
        self.render_count += 1;

        let data = &sample.data;
        let mut frames = 0;
        for out in self.buf.iter_mut() {
            let env = self.envelope.next();
            if self.envelope.section == EnvelopeSection::Finished {
                self.off();
                break;
            }

            let pos = self.phase as usize;
            let Some(&s0) = data.get(pos) else {
                self.off();
                break;
            };
            let next = match sample.loop_range {
                Some((start, end)) if pos + 1 >= end => data.get(start).copied(),
                _ => data.get(pos + 1).copied(),
            };
            let s1 = next.unwrap_or(0.0);
            let frac = (self.phase - pos as f64) as f32;
            *out = (s0 + frac * (s1 - s0)) * env;
            frames += 1;

            self.phase += self.phase_incr;
            if let Some((start, end)) = sample.loop_range {
                let len = end.saturating_sub(start) as f64;
                if len > 0.0 && self.phase >= end as f64 {
                    self.phase = start as f64 + (self.phase - start as f64).rem_euclid(len);
                }
            }
        }
        frames
    }

    /// Add the last rendered block into the output and send buffers
    pub fn mix(
        &self,
        left: &mut [f32],
        right: &mut [f32],
        reverb: Option<&mut [f32]>,
        chorus: Option<&mut [f32]>,
    ) {
        let amp = self.amp * self.gain;
        let (amp_l, amp_r) = (amp * self.pan_left, amp * self.pan_right);
        for ((s, l), r) in self.buf.iter().zip(left.iter_mut()).zip(right.iter_mut()) {
            *l += s * amp_l;
            *r += s * amp_r;
        }
        if let Some(reverb) = reverb {
            let send = amp * self.reverb_send;
            for (s, out) in self.buf.iter().zip(reverb.iter_mut()) {
                *out += s * send;
            }
        }
        if let Some(chorus) = chorus {
            let send = amp * self.chorus_send;
            for (s, out) in self.buf.iter().zip(chorus.iter_mut()) {
                *out += s * send;
            }
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn chan(&self) -> usize {
        self.chan
    }

    pub fn key(&self) -> u8 {
        self.key
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn exclusive_class(&self) -> i32 {
        self.gens.get(GenType::ExclusiveClass) as i32
    }

    /// Envelope amplitude used for steal priority (attack counts as full level)
    pub fn priority_amp(&self) -> f32 {
        if self.envelope.section > EnvelopeSection::Attack {
            self.envelope.amp
        } else {
            1.0
        }
    }

    pub fn render_count(&self) -> u64 {
        self.render_count
    }

    pub fn info(&self) -> VoiceInfo {
        VoiceInfo {
            id: self.id,
            chan: self.chan,
            key: self.key,
            vel: self.vel,
            state: self.state,
            exclusive_class: self.exclusive_class(),
            start_tick: self.start_tick,
            envelope_section: self.envelope.section,
            envelope_amp: self.envelope.amp,
            phase_increment: self.phase_incr,
            render_count: self.render_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelControls;

    fn started_voice(gens: GenSet, key: u8) -> (Voice, ChannelControls) {
        let controls = ChannelControls::new(0);
        let mut voice = Voice::new(44100.0);
        let sample = Arc::new(Sample::sine("sine", 256, 69, 440.0));
        voice.init(sample, gens, 0, key, 127, 1, 0, 1.0);
        voice.start(&controls, None);
        (voice, controls)
    }

    #[test]
    fn test_voice_starts_sounding() {
        let (mut voice, _) = started_voice(GenSet::default(), 69);
        assert_eq!(voice.state(), VoiceState::Sounding);
        assert_eq!(voice.write(), BLOCK_SIZE);
        assert_eq!(voice.render_count(), 1);
        assert!(voice.buf.iter().any(|s| s.abs() > 0.0));
    }

    #[test]
    fn test_root_key_plays_at_recorded_pitch() {
        let (voice, _) = started_voice(GenSet::default(), 69);
        // 256-sample cycle at 440 Hz, output at 44.1 kHz
        let expected = 256.0 * 440.0 / 44100.0;
        assert!((voice.info().phase_increment - expected).abs() < 1e-9);
    }

    #[test]
    fn test_octave_doubles_increment() {
        let (low, _) = started_voice(GenSet::default(), 57);
        let (high, _) = started_voice(GenSet::default(), 69);
        let ratio = high.info().phase_increment / low.info().phase_increment;
        assert!((ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_tuning_overrides_equal_temperament() {
        let mut offsets = [0.0; 12];
        offsets[9] = 100.0;
        let tuning = Tuning::with_octave("A up", 0, 0, &offsets);
        let controls = ChannelControls::new(0);
        let mut voice = Voice::new(44100.0);
        voice.init(
            Arc::new(Sample::sine("sine", 256, 69, 440.0)),
            GenSet::default(),
            0,
            69,
            100,
            1,
            0,
            1.0,
        );
        voice.start(&controls, Some(&tuning));
        let base = 256.0 * 440.0 / 44100.0;
        let ratio = voice.info().phase_increment / base;
        assert!((ratio - 2f64.powf(100.0 / 1200.0)).abs() < 1e-9);
    }

    #[test]
    fn test_huge_increment_wraps_inside_loop() {
        let (mut voice, _) = started_voice(GenSet::default(), 69);
        voice.phase_incr = 1.0e300;
        assert_eq!(voice.write(), BLOCK_SIZE);
        assert!(voice.phase < 256.0);
        assert_eq!(voice.state(), VoiceState::Sounding);
    }

    #[test]
    fn test_non_finite_increment_silences_voice() {
        let (mut voice, _) = started_voice(GenSet::default(), 69);
        voice.phase_incr = f64::INFINITY;
        assert_eq!(voice.write(), 0);
        assert_eq!(voice.state(), VoiceState::Off);
        assert!(voice.buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_note_off_with_sustain() {
        let (mut voice, _) = started_voice(GenSet::default(), 60);
        voice.note_off(true);
        assert_eq!(voice.state(), VoiceState::Sustained);
        // Sustained voices are damped by release
        voice.release();
        assert_eq!(voice.state(), VoiceState::Released);
    }

    #[test]
    fn test_release_finishes_voice() {
        let gens = GenSet::default().with(GenType::ReleaseVolEnv, -12000.0);
        let (mut voice, _) = started_voice(gens, 60);
        voice.write();
        voice.note_off(false);
        assert_eq!(voice.state(), VoiceState::Released);
        // ~1ms release at 44.1 kHz is well under one block
        voice.write();
        assert_eq!(voice.state(), VoiceState::Off);
        assert!(voice.state().is_available());
    }

    #[test]
    fn test_off_is_immediate() {
        let (mut voice, _) = started_voice(GenSet::default(), 60);
        voice.off();
        assert_eq!(voice.state(), VoiceState::Off);
        assert_eq!(voice.write(), 0);
    }

    #[test]
    fn test_unlooped_sample_ends() {
        let controls = ChannelControls::new(0);
        let mut voice = Voice::new(44100.0);
        let sample = Sample {
            name: "blip".to_string(),
            data: vec![0.5; 10],
            sample_rate: 44100.0,
            root_key: 60,
            pitch_correction: 0,
            loop_range: None,
        };
        voice.init(Arc::new(sample), GenSet::default(), 0, 60, 127, 1, 0, 1.0);
        voice.start(&controls, None);
        assert_eq!(voice.write(), 10);
        assert_eq!(voice.state(), VoiceState::Off);
    }

    #[test]
    fn test_priority_amp_during_attack() {
        let gens = GenSet::default().with(GenType::AttackVolEnv, 1200.0);
        let (mut voice, _) = started_voice(gens, 60);
        voice.write();
        assert_eq!(voice.priority_amp(), 1.0);
    }

    #[test]
    fn test_mix_applies_pan() {
        let controls = ChannelControls::new(0);
        controls.set_cc(cc::PAN_MSB, 0);
        let mut voice = Voice::new(44100.0);
        voice.init(
            Arc::new(Sample::sine("sine", 256, 69, 440.0)),
            GenSet::default(),
            0,
            69,
            127,
            1,
            0,
            1.0,
        );
        voice.start(&controls, None);
        voice.write();
        let mut left = [0.0f32; BLOCK_SIZE];
        let mut right = [0.0f32; BLOCK_SIZE];
        voice.mix(&mut left, &mut right, None, None);
        let energy_l: f32 = left.iter().map(|s| s * s).sum();
        let energy_r: f32 = right.iter().map(|s| s * s).sum();
        assert!(energy_l > 0.0);
        assert!(energy_r < energy_l * 1e-6);
    }
}
