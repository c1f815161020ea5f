//! Voice pool, allocator and stealer
//!
//! The pool is a fixed array of voice slots allocated once. Indices never move,
//! which is what lets core workers claim voices by index. Each slot carries a
//! `playing` flag next to its voice so that scans (allocation, the render
//! cursor) never need to lock a voice that is not theirs.
//!
//! Every mutation goes through [`VoiceGuard`], which republishes the flag when
//! it is dropped.
//!
//! Everything here runs on the rendering thread except [`VoicePool::lock`] from
//! core workers during the render phase.
//!
//! The per-slot mutex is never contended. Outside the render phase only the
//! rendering thread touches voices. During it, each index is claimed exactly
//! once by a compare-and-swap on the core renderer's cursor, so the one thread
//! that locks a slot is the one that claimed it. Blocking stays confined to
//! the work and barrier signalling in [`crate::core_render`].

use crate::voice::{Voice, VoiceInfo, VoiceState};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

const DRUM_CHANNEL: usize = crate::midi::DRUM_CHANNEL;

struct VoiceSlot {
    playing: AtomicBool,
    voice: Mutex<Voice>,
}

/// Exclusive access to one voice
pub struct VoiceGuard<'a> {
    voice: MutexGuard<'a, Voice>,
    playing: &'a AtomicBool,
}

impl Deref for VoiceGuard<'_> {
    type Target = Voice;

    fn deref(&self) -> &Voice {
        &self.voice
    }
}

impl DerefMut for VoiceGuard<'_> {
    fn deref_mut(&mut self) -> &mut Voice {
        &mut self.voice
    }
}

impl Drop for VoiceGuard<'_> {
    fn drop(&mut self) {
        self.playing.store(self.voice.is_playing(), Ordering::Release);
    }
}

/// Fixed-size voice array with a lowerable logical polyphony limit
pub struct VoicePool {
    slots: Box<[VoiceSlot]>,
    polyphony: AtomicUsize,
}

impl VoicePool {
    pub fn new(size: usize, output_rate: f64) -> Self {
        let slots = (0..size)
            .map(|_| VoiceSlot {
                playing: AtomicBool::new(false),
                voice: Mutex::new(Voice::new(output_rate)),
            })
            .collect();
        Self {
            slots,
            polyphony: AtomicUsize::new(size),
        }
    }

    /// Physical pool size
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Logical limit: only voices below this index are used
    pub fn polyphony(&self) -> usize {
        self.polyphony.load(Ordering::Acquire)
    }

    /// Lower or raise the logical limit, forcing voices above it off
    pub fn set_polyphony(&self, polyphony: usize) {
        let polyphony = polyphony.min(self.capacity());
        self.polyphony.store(polyphony, Ordering::Release);
        for i in polyphony..self.capacity() {
            if self.is_playing(i) {
                self.lock(i).off();
            }
        }
    }

    pub fn lock(&self, index: usize) -> VoiceGuard<'_> {
        let slot = &self.slots[index];
        VoiceGuard {
            voice: slot.voice.lock().unwrap_or_else(PoisonError::into_inner),
            playing: &slot.playing,
        }
    }

    #[inline]
    pub fn is_playing(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .is_some_and(|s| s.playing.load(Ordering::Acquire))
    }

    pub fn active_count(&self) -> usize {
        (0..self.polyphony()).filter(|&i| self.is_playing(i)).count()
    }

    /// First index at or after `start` (below `bound`) holding a playing voice
    pub fn next_playing(&self, start: usize, bound: usize) -> Option<usize> {
        (start..bound.min(self.capacity())).find(|&i| self.is_playing(i))
    }

    /// First-fit scan for a voice that is not playing
    pub fn find_available(&self) -> Option<usize> {
        (0..self.polyphony()).find(|&i| !self.is_playing(i))
    }

    /// Pick the lowest-priority playing voice and force it off
    ///
    /// Lower score is stolen first; ties go to the lowest index.
    pub fn steal(&self, note_id: u32) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for i in 0..self.polyphony() {
            let voice = self.lock(i);
            if !voice.is_playing() {
                // Finished between the availability scan and now
                return Some(i);
            }
            let score = steal_score(&voice, note_id);
            if best.map_or(true, |(_, s)| score < s) {
                best = Some((i, score));
            }
        }

        let (index, _) = best?;
        let mut voice = self.lock(index);
        debug!(
            "Killing voice {}, index {}, chan {}, key {}",
            voice.id(),
            index,
            voice.chan(),
            voice.key()
        );
        voice.off();
        Some(index)
    }

    /// Available voice, or a stolen one; `None` only when polyphony is zero
    pub fn allocate(&self, note_id: u32) -> Option<usize> {
        self.find_available().or_else(|| self.steal(note_id))
    }

    /// Force off every other playing voice on `chan` sharing a nonzero class
    pub fn kill_by_exclusive_class(&self, chan: usize, class: i32, new_id: u32) -> usize {
        if class == 0 {
            return 0;
        }
        self.for_each_playing(|voice| {
            if voice.chan() == chan && voice.exclusive_class() == class && voice.id() != new_id {
                voice.off();
                true
            } else {
                false
            }
        })
    }

    /// Note-off for sounding voices on `chan` playing `key`
    pub fn note_off(&self, chan: usize, key: u8, sustain_down: bool) -> usize {
        self.for_each_playing(|voice| {
            if voice.state() == VoiceState::Sounding && voice.chan() == chan && voice.key() == key {
                voice.note_off(sustain_down);
                true
            } else {
                false
            }
        })
    }

    /// Release voices on `chan`/`key` left over from an earlier note
    pub fn release_on_same_note(&self, chan: usize, key: u8, note_id: u32, sustain_down: bool) {
        self.for_each_playing(|voice| {
            if voice.chan() == chan && voice.key() == key && voice.id() != note_id {
                if voice.state() == VoiceState::Sustained {
                    voice.release();
                } else {
                    voice.note_off(sustain_down);
                }
                true
            } else {
                false
            }
        });
    }

    /// Sustain pedal released: sustained voices on `chan` enter release
    pub fn damp(&self, chan: usize) -> usize {
        self.for_each_playing(|voice| {
            if voice.chan() == chan && voice.state() == VoiceState::Sustained {
                voice.release();
                true
            } else {
                false
            }
        })
    }

    /// Graceful release of every voice on `chan` (all channels for `None`)
    pub fn all_notes_off(&self, chan: Option<usize>) -> usize {
        self.for_each_playing(|voice| {
            if chan.map_or(true, |c| voice.chan() == c) {
                voice.release();
                true
            } else {
                false
            }
        })
    }

    /// Immediate silence of every voice on `chan` (all channels for `None`)
    pub fn all_sounds_off(&self, chan: Option<usize>) -> usize {
        self.for_each_playing(|voice| {
            if chan.map_or(true, |c| voice.chan() == c) {
                voice.off();
                true
            } else {
                false
            }
        })
    }

    /// Note-off for every sounding voice of group `id`
    pub fn stop(&self, id: u32, sustain_down: impl Fn(usize) -> bool) -> usize {
        self.for_each_playing(|voice| {
            if voice.id() == id && voice.state() == VoiceState::Sounding {
                let sustained = sustain_down(voice.chan());
                voice.note_off(sustained);
                true
            } else {
                false
            }
        })
    }

    /// Snapshots of playing voices in group `id` (every playing voice for `None`)
    pub fn voice_list(&self, id: Option<u32>) -> Vec<VoiceInfo> {
        (0..self.capacity())
            .filter(|&i| self.is_playing(i))
            .map(|i| self.lock(i).info())
            .filter(|info| id.map_or(true, |id| info.id == id))
            .collect()
    }

    pub fn info(&self, index: usize) -> Option<VoiceInfo> {
        (index < self.capacity()).then(|| self.lock(index).info())
    }

    /// Run `f` on each playing voice, counting the ones it reports as changed
    pub fn for_each_playing(&self, mut f: impl FnMut(&mut Voice) -> bool) -> usize {
        let mut changed = 0;
        for i in 0..self.capacity() {
            if self.is_playing(i) && f(&mut self.lock(i)) {
                changed += 1;
            }
        }
        changed
    }
}

/// Steal priority of a playing voice
///
/// ```text
/// 10000
///   + 4000 on the percussion channel
///   - 2000 when released
///   - 1000 when sustained
///   - clamp(note_id - voice id, 0, 100)
///   + envelope amplitude * 1000
/// ```
pub fn steal_score(voice: &Voice, note_id: u32) -> f32 {
    let mut score = 10000.0;
    if voice.chan() == DRUM_CHANNEL {
        score += 4000.0;
    }
    match voice.state() {
        VoiceState::Released => score -= 2000.0,
        VoiceState::Sustained => score -= 1000.0,
        _ => {}
    }
    let age = (note_id as i64 - voice.id() as i64).clamp(0, 100);
    score -= age as f32;
    score += voice.priority_amp() * 1000.0;
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelControls;
    use crate::generator::{GenSet, GenType};
    use crate::voice::Sample;
    use std::sync::Arc;

    fn start(pool: &VoicePool, index: usize, chan: usize, key: u8, id: u32, gens: GenSet) {
        let controls = ChannelControls::new(chan);
        let mut voice = pool.lock(index);
        voice.init(
            Arc::new(Sample::sine("sine", 64, 69, 440.0)),
            gens,
            chan,
            key,
            100,
            id,
            0,
            1.0,
        );
        voice.start(&controls, None);
    }

    #[test]
    fn test_first_fit() {
        let pool = VoicePool::new(4, 44100.0);
        assert_eq!(pool.find_available(), Some(0));
        start(&pool, 0, 0, 60, 1, GenSet::default());
        start(&pool, 2, 0, 62, 2, GenSet::default());
        assert_eq!(pool.find_available(), Some(1));
        assert_eq!(pool.active_count(), 2);
    }

    #[test]
    fn test_steal_prefers_released() {
        let pool = VoicePool::new(3, 44100.0);
        for i in 0..3 {
            start(&pool, i, 0, 60 + i as u8, i as u32, GenSet::default());
        }
        pool.lock(1).release();
        assert_eq!(pool.allocate(3), Some(1));
        assert_eq!(pool.lock(1).state(), VoiceState::Off);
    }

    #[test]
    fn test_steal_avoids_percussion() {
        let pool = VoicePool::new(2, 44100.0);
        start(&pool, 0, DRUM_CHANNEL, 36, 0, GenSet::default());
        start(&pool, 1, 0, 60, 1, GenSet::default());
        assert_eq!(pool.steal(2), Some(1));
    }

    #[test]
    fn test_steal_tie_goes_to_lowest_index() {
        let pool = VoicePool::new(2, 44100.0);
        start(&pool, 0, 0, 60, 500, GenSet::default());
        start(&pool, 1, 0, 62, 500, GenSet::default());
        assert_eq!(pool.steal(1000), Some(0));
    }

    #[test]
    fn test_age_term_is_clamped() {
        let pool = VoicePool::new(1, 44100.0);
        start(&pool, 0, 0, 60, 0, GenSet::default());
        let voice = pool.lock(0);
        // Attack counts as full amplitude
        assert_eq!(steal_score(&voice, 5000), 10000.0 - 100.0 + 1000.0);
        assert_eq!(steal_score(&voice, 0), 11000.0);
    }

    #[test]
    fn test_exclusive_class() {
        let pool = VoicePool::new(4, 44100.0);
        let hat = GenSet::default().with(GenType::ExclusiveClass, 5.0);
        start(&pool, 0, 9, 46, 1, hat);
        start(&pool, 1, 9, 36, 2, GenSet::default());
        start(&pool, 2, 3, 46, 3, hat);
        assert_eq!(pool.kill_by_exclusive_class(9, 5, 4), 1);
        assert_eq!(pool.lock(0).state(), VoiceState::Off);
        assert_eq!(pool.lock(1).state(), VoiceState::Sounding);
        assert_eq!(pool.lock(2).state(), VoiceState::Sounding);
        assert_eq!(pool.kill_by_exclusive_class(9, 0, 4), 0);
    }

    #[test]
    fn test_note_off_and_damp() {
        let pool = VoicePool::new(2, 44100.0);
        start(&pool, 0, 0, 60, 1, GenSet::default());
        start(&pool, 1, 0, 62, 2, GenSet::default());
        assert_eq!(pool.note_off(0, 60, true), 1);
        assert_eq!(pool.lock(0).state(), VoiceState::Sustained);
        assert_eq!(pool.damp(0), 1);
        assert_eq!(pool.lock(0).state(), VoiceState::Released);
        assert_eq!(pool.lock(1).state(), VoiceState::Sounding);
    }

    #[test]
    fn test_lower_polyphony_forces_off() {
        let pool = VoicePool::new(4, 44100.0);
        for i in 0..4 {
            start(&pool, i, 0, 60 + i as u8, i as u32, GenSet::default());
        }
        pool.set_polyphony(2);
        assert_eq!(pool.active_count(), 2);
        assert!(!pool.is_playing(3));
        assert_eq!(pool.find_available(), None);
    }

    #[test]
    fn test_stop_group() {
        let pool = VoicePool::new(3, 44100.0);
        start(&pool, 0, 0, 60, 7, GenSet::default());
        start(&pool, 1, 1, 64, 7, GenSet::default());
        start(&pool, 2, 0, 67, 8, GenSet::default());
        assert_eq!(pool.stop(7, |_| false), 2);
        assert_eq!(pool.voice_list(Some(7)).len(), 2);
        assert!(pool
            .voice_list(Some(7))
            .iter()
            .all(|v| v.state == VoiceState::Released));
        assert_eq!(pool.voice_list(None).len(), 3);
    }
}
