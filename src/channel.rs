//! Per-channel state
//!
//! Channel state is split in two:
//!
//! ```text
//!   caller threads                       rendering thread
//!   ──────────────                       ────────────────
//!   cc / pitch bend / bank ──► ChannelControls (atomics) ◄── voices read on modulate
//!   program change ──────────► shadow preset info
//!                                        Channel { preset, tuning }  (owned, no locks)
//! ```
//!
//! [`ChannelControls`] holds plain values that any thread may store or load
//! without locking. [`Channel`] holds the reference-counted objects (preset and
//! tuning) and is only ever touched by the rendering thread.

use crate::command::ChannelPreset;
use crate::generator::{GenType, GEN_LAST};
use crate::midi::{cc, DRUM_BANK, DRUM_CHANNEL};
use crate::tuning::Tuning;
use arc_swap::ArcSwapOption;
use crossbeam::atomic::AtomicCell;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

const PROG_BITS: u32 = 8;
const BANK_BITS: u32 = 14;
const BANK_SHIFT: u32 = PROG_BITS;
const SFONT_SHIFT: u32 = 32;
const PROG_MASK: u64 = (1 << PROG_BITS) - 1;
const BANK_MASK: u64 = (1 << BANK_BITS) - 1;

/// Program number meaning "no program selected"
pub const PROG_UNSET: u32 = 128;

/// Name and address of the preset assigned to a channel, readable from any thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetInfo {
    pub name: String,
    pub sfont_id: u32,
    pub bank: u32,
    pub program: u32,
}

/// Channel description returned by `get_channel_info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Whether a preset is assigned
    pub assigned: bool,
    pub sfont_id: u32,
    pub bank: u32,
    pub program: u32,
    pub name: String,
}

/// Lock-free controller state of one MIDI channel
#[derive(Debug)]
pub struct ChannelControls {
    num: usize,
    cc: [AtomicU8; 128],
    channel_pressure: AtomicU8,
    pitch_bend: AtomicU16,
    pitch_wheel_sensitivity: AtomicU8,
    sfont_bank_prog: AtomicU64,
    nrpn_select: AtomicI32,
    nrpn_active: AtomicBool,
    tuning_bank: AtomicU8,
    tuning_prog: AtomicU8,
    gen: [AtomicCell<f32>; GEN_LAST],
    gen_abs: [AtomicBool; GEN_LAST],
    preset_info: ArcSwapOption<PresetInfo>,
}

impl ChannelControls {
    pub fn new(num: usize) -> Self {
        let controls = Self {
            num,
            cc: std::array::from_fn(|_| AtomicU8::new(0)),
            channel_pressure: AtomicU8::new(0),
            pitch_bend: AtomicU16::new(8192),
            pitch_wheel_sensitivity: AtomicU8::new(2),
            sfont_bank_prog: AtomicU64::new(0),
            nrpn_select: AtomicI32::new(0),
            nrpn_active: AtomicBool::new(false),
            tuning_bank: AtomicU8::new(0),
            tuning_prog: AtomicU8::new(0),
            gen: std::array::from_fn(|_| AtomicCell::new(0.0)),
            gen_abs: std::array::from_fn(|_| AtomicBool::new(false)),
            preset_info: ArcSwapOption::empty(),
        };
        controls.init();
        controls
    }

    pub fn num(&self) -> usize {
        self.num
    }

    /// Full reset: program, tuning selection and every controller
    pub fn init(&self) {
        let bank = if self.num == DRUM_CHANNEL { DRUM_BANK } else { 0 };
        self.set_sfont_bank_prog(Some(0), Some(bank), Some(0));
        self.tuning_bank.store(0, Ordering::Relaxed);
        self.tuning_prog.store(0, Ordering::Relaxed);
        self.nrpn_select.store(0, Ordering::Relaxed);
        self.nrpn_active.store(false, Ordering::Relaxed);
        self.init_ctrl(false);
    }

    /// Reset controllers; `all_ctrl_off` keeps the values CC121 must not touch
    pub fn init_ctrl(&self, all_ctrl_off: bool) {
        self.channel_pressure.store(0, Ordering::Relaxed);
        self.pitch_bend.store(8192, Ordering::Relaxed);
        for (g, abs) in self.gen.iter().zip(self.gen_abs.iter()) {
            g.store(0.0);
            abs.store(false, Ordering::Relaxed);
        }

        if all_ctrl_off {
            for num in 0..128u8 {
                let keep = matches!(
                    num,
                    cc::BANK_SELECT_MSB
                        | cc::BANK_SELECT_LSB
                        | cc::VOLUME_MSB
                        | cc::PAN_MSB
                        | 91..=95
                        | 120..=127
                );
                if !keep {
                    self.set_cc(num, 0);
                }
            }
        } else {
            for num in 0..128u8 {
                self.set_cc(num, 0);
            }
            self.pitch_wheel_sensitivity.store(2, Ordering::Relaxed);
            self.set_cc(cc::VOLUME_MSB, 100);
            self.set_cc(cc::PAN_MSB, 64);
        }

        self.set_cc(cc::EXPRESSION_MSB, 127);
        self.set_cc(cc::NRPN_MSB, 127);
        self.set_cc(cc::NRPN_LSB, 127);
        self.set_cc(cc::RPN_MSB, 127);
        self.set_cc(cc::RPN_LSB, 127);
    }

    pub fn cc(&self, num: u8) -> u8 {
        self.cc[(num & 0x7F) as usize].load(Ordering::Relaxed)
    }

    pub fn set_cc(&self, num: u8, value: u8) {
        self.cc[(num & 0x7F) as usize].store(value & 0x7F, Ordering::Relaxed);
    }

    pub fn sustain_down(&self) -> bool {
        self.cc(cc::SUSTAIN_SWITCH) >= 64
    }

    pub fn channel_pressure(&self) -> u8 {
        self.channel_pressure.load(Ordering::Relaxed)
    }

    pub fn set_channel_pressure(&self, value: u8) {
        self.channel_pressure.store(value, Ordering::Relaxed);
    }

    pub fn pitch_bend(&self) -> u16 {
        self.pitch_bend.load(Ordering::Relaxed)
    }

    pub fn set_pitch_bend(&self, value: u16) {
        self.pitch_bend.store(value.min(16383), Ordering::Relaxed);
    }

    pub fn pitch_wheel_sensitivity(&self) -> u8 {
        self.pitch_wheel_sensitivity.load(Ordering::Relaxed)
    }

    pub fn set_pitch_wheel_sensitivity(&self, value: u8) {
        self.pitch_wheel_sensitivity.store(value, Ordering::Relaxed);
    }

    /// Update any of SoundFont id, bank and program in one atomic step
    pub fn set_sfont_bank_prog(&self, sfont_id: Option<u32>, bank: Option<u32>, prog: Option<u32>) {
        let _ = self
            .sfont_bank_prog
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |packed| {
                let (old_sfont, old_bank, old_prog) = unpack(packed);
                Some(pack(
                    sfont_id.unwrap_or(old_sfont),
                    bank.unwrap_or(old_bank),
                    prog.unwrap_or(old_prog),
                ))
            });
    }

    /// (SoundFont id, bank, program)
    pub fn sfont_bank_prog(&self) -> (u32, u32, u32) {
        unpack(self.sfont_bank_prog.load(Ordering::Acquire))
    }

    pub fn set_bank_msb(&self, msb: u8) {
        let _ = self
            .sfont_bank_prog
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |packed| {
                let (sfont, bank, prog) = unpack(packed);
                Some(pack(sfont, ((msb as u32 & 0x7F) << 7) | (bank & 0x7F), prog))
            });
    }

    pub fn set_bank_lsb(&self, lsb: u8) {
        let _ = self
            .sfont_bank_prog
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |packed| {
                let (sfont, bank, prog) = unpack(packed);
                Some(pack(sfont, (bank & !0x7F) | (lsb as u32 & 0x7F), prog))
            });
    }

    pub fn nrpn_select(&self) -> i32 {
        self.nrpn_select.load(Ordering::Relaxed)
    }

    pub fn set_nrpn_select(&self, value: i32) {
        self.nrpn_select.store(value, Ordering::Relaxed);
    }

    pub fn nrpn_active(&self) -> bool {
        self.nrpn_active.load(Ordering::Relaxed)
    }

    pub fn set_nrpn_active(&self, active: bool) {
        self.nrpn_active.store(active, Ordering::Relaxed);
    }

    /// Tuning (bank, prog) selected through RPN 4/3
    pub fn tuning_selection(&self) -> (u8, u8) {
        (
            self.tuning_bank.load(Ordering::Relaxed),
            self.tuning_prog.load(Ordering::Relaxed),
        )
    }

    pub fn set_tuning_bank(&self, bank: u8) {
        self.tuning_bank.store(bank, Ordering::Relaxed);
    }

    pub fn set_tuning_prog(&self, prog: u8) {
        self.tuning_prog.store(prog, Ordering::Relaxed);
    }

    pub fn gen(&self, gen: GenType) -> f32 {
        self.gen[gen.index()].load()
    }

    pub fn gen_is_absolute(&self, gen: GenType) -> bool {
        self.gen_abs[gen.index()].load(Ordering::Relaxed)
    }

    pub fn set_gen(&self, gen: GenType, value: f32, absolute: bool) {
        self.gen[gen.index()].store(value);
        self.gen_abs[gen.index()].store(absolute, Ordering::Relaxed);
    }

    /// Voice generator value after the channel offset (or absolute override)
    pub fn effective_gen(&self, gen: GenType, voice_value: f32) -> f32 {
        let value = if self.gen_is_absolute(gen) {
            self.gen(gen)
        } else {
            voice_value + self.gen(gen)
        };
        gen.clamp(value)
    }

    pub fn preset_info(&self) -> Option<Arc<PresetInfo>> {
        self.preset_info.load_full()
    }

    pub fn set_preset_info(&self, info: Option<PresetInfo>) {
        self.preset_info.store(info.map(Arc::new));
    }

    pub fn channel_info(&self) -> ChannelInfo {
        match self.preset_info() {
            Some(info) => ChannelInfo {
                assigned: true,
                sfont_id: info.sfont_id,
                bank: info.bank,
                program: info.program,
                name: info.name.clone(),
            },
            None => {
                let (sfont_id, bank, program) = self.sfont_bank_prog();
                ChannelInfo {
                    assigned: false,
                    sfont_id,
                    bank,
                    program,
                    name: String::new(),
                }
            }
        }
    }
}

fn pack(sfont_id: u32, bank: u32, prog: u32) -> u64 {
    ((sfont_id as u64) << SFONT_SHIFT)
        | ((bank as u64 & BANK_MASK) << BANK_SHIFT)
        | (prog as u64 & PROG_MASK)
}

fn unpack(packed: u64) -> (u32, u32, u32) {
    (
        (packed >> SFONT_SHIFT) as u32,
        ((packed >> BANK_SHIFT) & BANK_MASK) as u32,
        (packed & PROG_MASK) as u32,
    )
}

/// Rendering-thread view of a channel: the objects it holds references to
pub struct Channel {
    controls: Arc<ChannelControls>,
    preset: Option<ChannelPreset>,
    tuning: Option<Arc<Tuning>>,
}

impl Channel {
    pub fn new(controls: Arc<ChannelControls>) -> Self {
        Self {
            controls,
            preset: None,
            tuning: None,
        }
    }

    pub fn num(&self) -> usize {
        self.controls.num()
    }

    pub fn controls(&self) -> &ChannelControls {
        &self.controls
    }

    pub fn preset(&self) -> Option<&ChannelPreset> {
        self.preset.as_ref()
    }

    /// Install a preset, returning the previous one for deferred release
    pub fn set_preset(&mut self, preset: Option<ChannelPreset>) -> Option<ChannelPreset> {
        std::mem::replace(&mut self.preset, preset)
    }

    pub fn tuning(&self) -> Option<&Arc<Tuning>> {
        self.tuning.as_ref()
    }

    /// Install a tuning, returning the previous one for deferred release
    pub fn set_tuning(&mut self, tuning: Option<Arc<Tuning>>) -> Option<Arc<Tuning>> {
        std::mem::replace(&mut self.tuning, tuning)
    }

    pub fn has_tuning(&self, tuning: &Arc<Tuning>) -> bool {
        self.tuning.as_ref().is_some_and(|t| Arc::ptr_eq(t, tuning))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let controls = ChannelControls::new(0);
        assert_eq!(controls.cc(cc::VOLUME_MSB), 100);
        assert_eq!(controls.cc(cc::PAN_MSB), 64);
        assert_eq!(controls.cc(cc::EXPRESSION_MSB), 127);
        assert_eq!(controls.pitch_bend(), 8192);
        assert_eq!(controls.pitch_wheel_sensitivity(), 2);
        assert_eq!(controls.sfont_bank_prog(), (0, 0, 0));
    }

    #[test]
    fn test_drum_channel_bank() {
        let controls = ChannelControls::new(DRUM_CHANNEL);
        assert_eq!(controls.sfont_bank_prog().1, DRUM_BANK);
    }

    #[test]
    fn test_bank_msb_lsb() {
        let controls = ChannelControls::new(0);
        controls.set_bank_msb(1);
        controls.set_bank_lsb(3);
        assert_eq!(controls.sfont_bank_prog().1, 131);
        controls.set_bank_msb(0);
        assert_eq!(controls.sfont_bank_prog().1, 3);
    }

    #[test]
    fn test_partial_sfont_bank_prog_update() {
        let controls = ChannelControls::new(0);
        controls.set_sfont_bank_prog(Some(7), Some(16383), Some(128));
        controls.set_sfont_bank_prog(None, None, Some(42));
        assert_eq!(controls.sfont_bank_prog(), (7, 16383, 42));
    }

    #[test]
    fn test_all_ctrl_off_keeps_volume() {
        let controls = ChannelControls::new(0);
        controls.set_cc(cc::VOLUME_MSB, 80);
        controls.set_cc(cc::SUSTAIN_SWITCH, 127);
        controls.set_pitch_bend(0);
        controls.init_ctrl(true);
        assert_eq!(controls.cc(cc::VOLUME_MSB), 80);
        assert_eq!(controls.cc(cc::SUSTAIN_SWITCH), 0);
        assert_eq!(controls.pitch_bend(), 8192);
    }

    #[test]
    fn test_effective_gen() {
        let controls = ChannelControls::new(0);
        controls.set_gen(GenType::Pan, 100.0, false);
        assert_eq!(controls.effective_gen(GenType::Pan, 50.0), 150.0);
        controls.set_gen(GenType::Pan, -200.0, true);
        assert_eq!(controls.effective_gen(GenType::Pan, 50.0), -200.0);
        controls.set_gen(GenType::Pan, 900.0, false);
        assert_eq!(controls.effective_gen(GenType::Pan, 0.0), 500.0);
    }

    #[test]
    fn test_channel_info_unassigned() {
        let controls = ChannelControls::new(2);
        controls.set_sfont_bank_prog(Some(3), Some(1), Some(5));
        let info = controls.channel_info();
        assert!(!info.assigned);
        assert_eq!((info.sfont_id, info.bank, info.program), (3, 1, 5));

        controls.set_preset_info(Some(PresetInfo {
            name: "Sine".to_string(),
            sfont_id: 3,
            bank: 1,
            program: 5,
        }));
        let info = controls.channel_info();
        assert!(info.assigned);
        assert_eq!(info.name, "Sine");
    }
}
