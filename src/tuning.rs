//! Named pitch maps selectable per MIDI channel
//!
//! A [`Tuning`] is immutable once it is registered: changing a tuning slot builds
//! a new tuning and replaces the old one. Tunings carry an explicit logical
//! reference count next to their `Arc`:
//!
//! - the tuning slot owns one reference
//! - every channel using the tuning owns one reference
//! - every in-flight command carrying the tuning owns one reference
//!
//! References are only ever released on the background reclaim thread (see
//! [`crate::return_queue`]), so the count reaching zero is observed exactly once
//! and never on the rendering thread in the normal case.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Number of keys in a tuning
pub const TUNING_KEYS: usize = 128;

/// A named pitch map: cents above MIDI key 0 for each of the 128 keys
#[derive(Debug)]
pub struct Tuning {
    name: String,
    bank: u8,
    prog: u8,
    pitch: [f64; TUNING_KEYS],
    refcount: AtomicI32,
}

impl Tuning {
    /// Create an equal-tempered tuning holding one reference
    pub fn new(name: &str, bank: u8, prog: u8) -> Self {
        let mut pitch = [0.0; TUNING_KEYS];
        for (key, p) in pitch.iter_mut().enumerate() {
            *p = key as f64 * 100.0;
        }
        Self {
            name: name.to_string(),
            bank,
            prog,
            pitch,
            refcount: AtomicI32::new(1),
        }
    }

    /// Create a tuning from 128 absolute pitches
    pub fn with_pitches(name: &str, bank: u8, prog: u8, pitch: &[f64; TUNING_KEYS]) -> Self {
        let mut tuning = Self::new(name, bank, prog);
        tuning.pitch = *pitch;
        tuning
    }

    /// Create a tuning repeating 12 cents offsets over every octave
    pub fn with_octave(name: &str, bank: u8, prog: u8, offsets: &[f64; 12]) -> Self {
        let mut tuning = Self::new(name, bank, prog);
        tuning.set_octave(offsets);
        tuning
    }

    /// Copy pitches and name into a fresh tuning holding one reference
    pub fn duplicate(&self) -> Self {
        Self {
            name: self.name.clone(),
            bank: self.bank,
            prog: self.prog,
            pitch: self.pitch,
            refcount: AtomicI32::new(1),
        }
    }

    pub fn set_octave(&mut self, offsets: &[f64; 12]) {
        for (key, p) in self.pitch.iter_mut().enumerate() {
            *p = key as f64 * 100.0 + offsets[key % 12];
        }
    }

    pub fn set_pitch(&mut self, key: usize, pitch: f64) {
        if let Some(p) = self.pitch.get_mut(key) {
            *p = pitch;
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bank(&self) -> u8 {
        self.bank
    }

    pub fn prog(&self) -> u8 {
        self.prog
    }

    /// Pitch of `key` in cents
    pub fn pitch(&self, key: usize) -> f64 {
        self.pitch[key.min(TUNING_KEYS - 1)]
    }

    pub fn pitches(&self) -> &[f64; TUNING_KEYS] {
        &self.pitch
    }

    pub fn refcount(&self) -> i32 {
        self.refcount.load(Ordering::Acquire)
    }

    pub(crate) fn add_ref(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop `count` references, returning true when the count reaches zero
    pub(crate) fn unref(&self, count: i32) -> bool {
        self.refcount.fetch_sub(count, Ordering::AcqRel) == count
    }
}

/// The (bank, prog) tuning slots, iterated in ascending order
#[derive(Debug, Default)]
pub struct TuningTable {
    slots: BTreeMap<(u8, u8), Arc<Tuning>>,
}

impl TuningTable {
    pub fn get(&self, bank: u8, prog: u8) -> Option<&Arc<Tuning>> {
        self.slots.get(&(bank, prog))
    }

    /// Store `tuning` in its slot, returning the previous occupant
    pub fn replace(&mut self, bank: u8, prog: u8, tuning: Arc<Tuning>) -> Option<Arc<Tuning>> {
        self.slots.insert((bank, prog), tuning)
    }

    /// Occupied slots in (bank, prog) order
    pub fn keys(&self) -> Vec<(u8, u8)> {
        self.slots.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_temperament() {
        let tuning = Tuning::new("ET", 0, 0);
        assert_eq!(tuning.pitch(0), 0.0);
        assert_eq!(tuning.pitch(69), 6900.0);
        assert_eq!(tuning.refcount(), 1);
    }

    #[test]
    fn test_octave_tuning() {
        let mut offsets = [0.0; 12];
        offsets[9] = 100.0;
        offsets[0] = -10.0;
        let tuning = Tuning::with_octave("A up", 0, 1, &offsets);
        assert_eq!(tuning.pitch(69), 7000.0);
        assert_eq!(tuning.pitch(60), 5990.0);
        assert_eq!(tuning.pitch(61), 6100.0);
    }

    #[test]
    fn test_refcount() {
        let tuning = Tuning::new("x", 0, 0);
        tuning.add_ref();
        tuning.add_ref();
        assert_eq!(tuning.refcount(), 3);
        assert!(!tuning.unref(2));
        assert!(tuning.unref(1));
        assert_eq!(tuning.refcount(), 0);
    }

    #[test]
    fn test_duplicate_resets_refcount() {
        let mut original = Tuning::new("orig", 2, 3);
        original.set_pitch(60, 6050.0);
        original.add_ref();
        let copy = original.duplicate();
        assert_eq!(copy.refcount(), 1);
        assert_eq!(copy.pitch(60), 6050.0);
        assert_eq!(copy.name(), "orig");
    }

    #[test]
    fn test_table_ordering() {
        let mut table = TuningTable::default();
        table.replace(3, 1, Arc::new(Tuning::new("c", 3, 1)));
        table.replace(0, 5, Arc::new(Tuning::new("a", 0, 5)));
        table.replace(0, 2, Arc::new(Tuning::new("b", 0, 2)));
        assert_eq!(table.keys(), vec![(0, 2), (0, 5), (3, 1)]);

        let old = table.replace(0, 5, Arc::new(Tuning::new("a2", 0, 5)));
        assert_eq!(old.map(|t| t.name().to_string()), Some("a".to_string()));
        assert_eq!(table.len(), 3);
    }
}
