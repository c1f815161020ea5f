//! Tuning slots and per-channel tuning selection
//!
//! Registered tunings are never modified. Every change builds a new tuning,
//! swaps it into its (bank, prog) slot under the library lock and, when
//! channels still use the old one, asks the renderer to move them over.

use super::control::SynthControl;
use super::sealed::Sealed;
use super::data7;
use crate::command::{Command, ReturnEvent};
use crate::error::{ensure, SynthError, SynthResult};
use crate::return_queue;
use crate::tuning::{Tuning, TUNING_KEYS};
use std::sync::Arc;

/// Name given to tunings created implicitly
pub const UNNAMED_TUNING: &str = "Unnamed";

/// Highest key pitch in cents, one semitone above key 127
pub const MAX_KEY_PITCH: f64 = 12800.0;

/// Largest octave tuning offset in cents
pub const MAX_OCTAVE_OFFSET: f64 = 100.0;

fn check_pitches(pitches: &[f64]) -> SynthResult<()> {
    match pitches
        .iter()
        .find(|p| !(p.is_finite() && (0.0..=MAX_KEY_PITCH).contains(*p)))
    {
        Some(p) => Err(SynthError::InvalidArgument(format!(
            "pitch {} outside 0..={} cents",
            p, MAX_KEY_PITCH
        ))),
        None => Ok(()),
    }
}

/// Tuning operations available on both [`super::Synth`] and [`super::Renderer`]
pub trait TuningControl: SynthControl {
    /// Store a key tuning (equal temperament for `None`) without retuning voices
    fn create_key_tuning(
        &mut self,
        bank: u32,
        prog: u32,
        name: &str,
        pitch: Option<&[f64; TUNING_KEYS]>,
    ) -> SynthResult<()> {
        self.activate_key_tuning(bank, prog, name, pitch, false)
    }

    /// Store a key tuning; `apply` retunes sounding voices of channels using the slot
    fn activate_key_tuning(
        &mut self,
        bank: u32,
        prog: u32,
        name: &str,
        pitch: Option<&[f64; TUNING_KEYS]>,
        apply: bool,
    ) -> SynthResult<()> {
        let (bank, prog) = slot(bank, prog)?;
        if let Some(pitch) = pitch {
            check_pitches(pitch)?;
        }
        update_tuning(self, bank, prog, apply, |_| match pitch {
            Some(pitch) => Tuning::with_pitches(name, bank, prog, pitch),
            None => Tuning::new(name, bank, prog),
        })
    }

    fn create_octave_tuning(
        &mut self,
        bank: u32,
        prog: u32,
        name: &str,
        cents: &[f64; 12],
    ) -> SynthResult<()> {
        self.activate_octave_tuning(bank, prog, name, cents, false)
    }

    /// Store a tuning repeating 12 cents offsets in every octave
    fn activate_octave_tuning(
        &mut self,
        bank: u32,
        prog: u32,
        name: &str,
        cents: &[f64; 12],
        apply: bool,
    ) -> SynthResult<()> {
        let (bank, prog) = slot(bank, prog)?;
        ensure(
            cents.iter().all(|c| c.is_finite() && c.abs() <= MAX_OCTAVE_OFFSET),
            || format!("octave offsets must lie within ±{} cents", MAX_OCTAVE_OFFSET),
        )?;
        update_tuning(self, bank, prog, apply, |_| {
            Tuning::with_octave(name, bank, prog, cents)
        })
    }

    /// Change the pitch of some keys in a slot, starting from equal temperament if empty
    fn tune_notes(
        &mut self,
        bank: u32,
        prog: u32,
        keys: &[u8],
        pitches: &[f64],
        apply: bool,
    ) -> SynthResult<()> {
        let (bank, prog) = slot(bank, prog)?;
        ensure(keys.len() == pitches.len(), || {
            format!("{} keys but {} pitches", keys.len(), pitches.len())
        })?;
        ensure(keys.iter().all(|&k| (k as usize) < TUNING_KEYS), || {
            "key out of range (0..128)".to_string()
        })?;
        check_pitches(pitches)?;

        update_tuning(self, bank, prog, apply, |old| {
            let mut tuning = match old {
                Some(old) => old.duplicate(),
                None => Tuning::new(UNNAMED_TUNING, bank, prog),
            };
            for (&key, &pitch) in keys.iter().zip(pitches) {
                tuning.set_pitch(key as usize, pitch);
            }
            tuning
        })
    }

    fn select_tuning(&mut self, chan: usize, bank: u32, prog: u32) -> SynthResult<()> {
        self.activate_tuning(chan, bank, prog, false)
    }

    /// Use the tuning in slot (bank, prog) on `chan`, creating an equal-tempered
    /// one if the slot is empty
    fn activate_tuning(&mut self, chan: usize, bank: u32, prog: u32, apply: bool) -> SynthResult<()> {
        let (bank, prog) = slot(bank, prog)?;
        let shared = self.shared();
        shared.channel(chan)?;

        let tuning = {
            let mut library = shared.library();
            let tuning = match library.tunings.get(bank, prog) {
                Some(tuning) => Arc::clone(tuning),
                None => {
                    let tuning = Arc::new(Tuning::new(UNNAMED_TUNING, bank, prog));
                    library.tunings.replace(bank, prog, Arc::clone(&tuning));
                    tuning
                }
            };
            // Travels with the command, then belongs to the channel
            tuning.add_ref();
            tuning
        };

        self.submit(Command::SetTuning {
            chan,
            tuning: Some(tuning),
            apply,
        })
    }

    fn reset_tuning(&mut self, chan: usize) -> SynthResult<()> {
        self.deactivate_tuning(chan, false)
    }

    /// Return `chan` to equal temperament
    fn deactivate_tuning(&mut self, chan: usize, apply: bool) -> SynthResult<()> {
        self.shared().channel(chan)?;
        self.submit(Command::SetTuning {
            chan,
            tuning: None,
            apply,
        })
    }

    /// Occupied (bank, prog) slots in ascending order
    fn tunings(&self) -> Vec<(u8, u8)> {
        self.shared().library().tunings.keys()
    }

    /// Name and pitches of the tuning in slot (bank, prog)
    fn tuning_dump(&self, bank: u32, prog: u32) -> SynthResult<(String, [f64; TUNING_KEYS])> {
        let (bank, prog) = slot(bank, prog)?;
        let library = self.shared().library();
        let tuning = library
            .tunings
            .get(bank, prog)
            .ok_or_else(|| SynthError::NotFound(format!("tuning {}:{}", bank, prog)))?;
        Ok((tuning.name().to_string(), *tuning.pitches()))
    }
}

impl<T: Sealed + ?Sized> TuningControl for T {}

fn slot(bank: u32, prog: u32) -> SynthResult<(u8, u8)> {
    Ok((data7(bank, "tuning bank")?, data7(prog, "tuning program")?))
}

/// Swap a freshly built tuning into its slot
///
/// The slot's reference on the old tuning is dropped through the return queue.
/// If anything else still holds the old tuning, the renderer moves its channels
/// to the new one.
fn update_tuning<C: Sealed + ?Sized>(
    ctl: &mut C,
    bank: u8,
    prog: u8,
    apply: bool,
    build: impl FnOnce(Option<&Tuning>) -> Tuning,
) -> SynthResult<()> {
    let shared = ctl.shared();
    let (old, new, in_use) = {
        let mut library = shared.library();
        let new = Arc::new(build(library.tunings.get(bank, prog).map(Arc::as_ref)));
        let old = library.tunings.replace(bank, prog, Arc::clone(&new));
        let in_use = old.as_ref().is_some_and(|old| old.refcount() > 1);
        if in_use {
            new.add_ref();
        }
        (old, new, in_use)
    };

    let Some(old) = old else {
        return Ok(());
    };
    return_queue::post_and_signal(
        shared,
        ReturnEvent::UnrefTuning {
            tuning: Arc::clone(&old),
            count: 1,
        },
    );
    if in_use {
        ctl.submit(Command::ReplaceTuning { old, new, apply })?;
    }
    Ok(())
}
