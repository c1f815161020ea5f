//! Multi-core voice rendering
//!
//! Persistent workers render voices alongside the thread that renders the
//! block. Work is handed out by a shared cursor instead of a channel:
//!
//! ```text
//! Primary                      Worker 1            Worker N
//!    |  cursor = first voice      |                   |
//!    |  work = true, broadcast -->|------------------>|
//!    |                            |                   |
//!  claim ──CAS cursor──►  claim ──CAS cursor──►  claim ──CAS cursor──►
//!  render voice i         render voice j         render voice k
//!    |  ...until the cursor reaches the polyphony bound
//!    |                            |                   |
//!    |  wait until in_progress == 0 <-- last one signals
//!    |
//!  mix every voice that produced output
//! ```
//!
//! The cursor only moves forward during a block and each CAS claims exactly
//! one index, so every playing voice is rendered exactly once. One mutex and
//! condition variable carry the work-available and barrier signals; they never
//! guard voice data.

use crate::error::{SynthError, SynthResult};
use crate::voice::BLOCK_SIZE;
use crate::voice_pool::VoicePool;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// Mix destinations for one block
pub struct MixBuffers {
    /// Left buffer per audio group
    pub left: Vec<[f32; BLOCK_SIZE]>,
    /// Right buffer per audio group
    pub right: Vec<[f32; BLOCK_SIZE]>,
    pub reverb_send: [f32; BLOCK_SIZE],
    pub chorus_send: [f32; BLOCK_SIZE],
    /// Effect outputs for the separate-effects mode: reverb, chorus
    pub fx_left: [[f32; BLOCK_SIZE]; 2],
    pub fx_right: [[f32; BLOCK_SIZE]; 2],
}

impl MixBuffers {
    pub fn new(groups: usize) -> Self {
        let groups = groups.max(1);
        Self {
            left: vec![[0.0; BLOCK_SIZE]; groups],
            right: vec![[0.0; BLOCK_SIZE]; groups],
            reverb_send: [0.0; BLOCK_SIZE],
            chorus_send: [0.0; BLOCK_SIZE],
            fx_left: [[0.0; BLOCK_SIZE]; 2],
            fx_right: [[0.0; BLOCK_SIZE]; 2],
        }
    }

    pub fn groups(&self) -> usize {
        self.left.len()
    }

    pub fn clear(&mut self) {
        for buf in self.left.iter_mut().chain(self.right.iter_mut()) {
            buf.fill(0.0);
        }
        self.reverb_send.fill(0.0);
        self.chorus_send.fill(0.0);
        for buf in self.fx_left.iter_mut().chain(self.fx_right.iter_mut()) {
            buf.fill(0.0);
        }
    }

    /// Mix one rendered voice into its group and the enabled sends
    fn mix_voice(&mut self, pool: &VoicePool, index: usize, with_reverb: bool, with_chorus: bool) {
        let voice = pool.lock(index);
        let group = voice.chan() % self.left.len();
        let reverb = with_reverb.then_some(&mut self.reverb_send[..]);
        let chorus = with_chorus.then_some(&mut self.chorus_send[..]);
        voice.mix(&mut self.left[group], &mut self.right[group], reverb, chorus);
    }
}

#[derive(Debug)]
struct CoreState {
    work: bool,
    active: bool,
    in_progress: usize,
    waiting_for_last: bool,
}

struct CoreShared {
    pool: Arc<VoicePool>,
    cursor: AtomicUsize,
    bound: AtomicUsize,
    // Set by whoever rendered a voice to non-empty output this block
    processed: Box<[AtomicBool]>,
    state: Mutex<CoreState>,
    cond: Condvar,
}

impl CoreShared {
    fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, CoreState>) -> MutexGuard<'a, CoreState> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the next playing voice at or after the cursor
    fn claim(&self) -> Option<usize> {
        let bound = self.bound.load(Ordering::Acquire);
        loop {
            let start = self.cursor.load(Ordering::Acquire);
            let found = self.pool.next_playing(start, bound)?;
            if self
                .cursor
                .compare_exchange(start, found + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(found);
            }
        }
    }

    /// Render voices until none are left to claim
    fn render_claimed(&self) {
        while let Some(index) = self.claim() {
            let frames = self.pool.lock(index).write();
            if frames > 0 {
                self.processed[index].store(true, Ordering::Release);
            }
        }
    }
}

/// Voice renderer for one or more cores
pub struct CoreRenderer {
    shared: Arc<CoreShared>,
    workers: Vec<JoinHandle<()>>,
}

impl CoreRenderer {
    /// Start `cores - 1` workers; the caller of [`CoreRenderer::render`] is the last core
    pub fn new(pool: Arc<VoicePool>, cores: usize, pin_threads: bool) -> SynthResult<Self> {
        let processed = (0..pool.capacity()).map(|_| AtomicBool::new(false)).collect();
        let shared = Arc::new(CoreShared {
            pool,
            cursor: AtomicUsize::new(0),
            bound: AtomicUsize::new(0),
            processed,
            state: Mutex::new(CoreState {
                work: false,
                active: true,
                in_progress: 0,
                waiting_for_last: false,
            }),
            cond: Condvar::new(),
        });

        let mut renderer = Self {
            shared,
            workers: Vec::new(),
        };
        for id in 1..cores.max(1) {
            let shared = Arc::clone(&renderer.shared);
            let handle = thread::Builder::new()
                .name(format!("voice-core-{}", id))
                .spawn(move || {
                    if pin_threads {
                        pin_to_core(id);
                    }
                    worker_loop(&shared);
                })
                .map_err(|e| SynthError::ThreadSpawn(format!("voice-core-{}: {}", id, e)))?;
            renderer.workers.push(handle);
        }
        debug!("Voice rendering on {} core(s)", renderer.cores());
        Ok(renderer)
    }

    /// Number of participating cores, the calling thread included
    pub fn cores(&self) -> usize {
        self.workers.len() + 1
    }

    /// Render every playing voice below the polyphony bound and mix it
    pub fn render(&self, buffers: &mut MixBuffers, with_reverb: bool, with_chorus: bool) {
        let pool = &self.shared.pool;
        let bound = pool.polyphony();

        if self.workers.is_empty() {
            for index in 0..bound {
                if !pool.is_playing(index) {
                    continue;
                }
                if pool.lock(index).write() > 0 {
                    buffers.mix_voice(pool, index, with_reverb, with_chorus);
                }
            }
            return;
        }

        let Some(first) = pool.next_playing(0, bound) else {
            return;
        };

        {
            let mut state = self.shared.lock();
            self.shared.bound.store(bound, Ordering::Release);
            self.shared.cursor.store(first, Ordering::Release);
            state.work = true;
            state.waiting_for_last = false;
            self.shared.cond.notify_all();
        }

        self.shared.render_claimed();

        {
            let mut state = self.shared.lock();
            state.work = false;
            if state.in_progress > 0 {
                state.waiting_for_last = true;
                while state.in_progress > 0 {
                    state = self.shared.wait(state);
                }
                state.waiting_for_last = false;
            }
        }

        for (index, processed) in self.shared.processed.iter().enumerate().take(bound) {
            if processed.swap(false, Ordering::AcqRel) {
                buffers.mix_voice(pool, index, with_reverb, with_chorus);
            }
        }
    }
}

fn worker_loop(shared: &CoreShared) {
    let mut state = shared.lock();
    state.in_progress += 1;
    loop {
        state.in_progress -= 1;
        if state.waiting_for_last && state.in_progress == 0 {
            shared.cond.notify_all();
        }
        while !state.work && state.active {
            state = shared.wait(state);
        }
        if !state.active {
            break;
        }
        state.in_progress += 1;
        drop(state);

        shared.render_claimed();

        state = shared.lock();
        state.work = false;
    }
}

fn pin_to_core(id: usize) {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    match core_ids.get(id) {
        Some(&core) if core_affinity::set_for_current(core) => {}
        _ => warn!("Could not set CPU affinity for voice core {}", id),
    }
}

impl Drop for CoreRenderer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.active = false;
            self.shared.cond.notify_all();
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Voice core thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelControls;
    use crate::generator::GenSet;
    use crate::voice::Sample;

    fn pool_with_voices(size: usize, playing: &[usize]) -> Arc<VoicePool> {
        let pool = Arc::new(VoicePool::new(size, 44100.0));
        let controls = ChannelControls::new(0);
        let sample = Arc::new(Sample::sine("sine", 64, 69, 440.0));
        for (n, &i) in playing.iter().enumerate() {
            let mut voice = pool.lock(i);
            voice.init(
                Arc::clone(&sample),
                GenSet::default(),
                n % 2,
                60,
                100,
                n as u32,
                0,
                1.0,
            );
            voice.start(&controls, None);
        }
        pool
    }

    fn assert_rendered_once(pool: &VoicePool, playing: &[usize]) {
        for i in 0..pool.capacity() {
            let expected = u64::from(playing.contains(&i));
            assert_eq!(pool.lock(i).render_count(), expected, "voice {}", i);
        }
    }

    #[test]
    fn test_single_core_renders_each_voice_once() {
        let playing = [0, 3, 4, 9];
        let pool = pool_with_voices(16, &playing);
        let renderer = CoreRenderer::new(Arc::clone(&pool), 1, false).unwrap();
        let mut buffers = MixBuffers::new(1);
        renderer.render(&mut buffers, true, true);
        assert_rendered_once(&pool, &playing);
        assert!(buffers.left[0].iter().any(|s| *s != 0.0));
    }

    #[test]
    fn test_multi_core_renders_each_voice_once() {
        let playing: Vec<usize> = (0..64).filter(|i| i % 3 != 1).collect();
        let pool = pool_with_voices(64, &playing);
        let renderer = CoreRenderer::new(Arc::clone(&pool), 4, false).unwrap();
        assert_eq!(renderer.cores(), 4);
        let mut buffers = MixBuffers::new(2);
        for block in 1..=20u64 {
            buffers.clear();
            renderer.render(&mut buffers, false, false);
            for i in 0..pool.capacity() {
                let expected = if playing.contains(&i) { block } else { 0 };
                assert_eq!(pool.lock(i).render_count(), expected);
            }
        }
        // Voices on channel 1 mix into group 1
        assert!(buffers.left[1].iter().any(|s| *s != 0.0));
    }

    #[test]
    fn test_no_playing_voices_is_silent() {
        let pool = Arc::new(VoicePool::new(8, 44100.0));
        let renderer = CoreRenderer::new(Arc::clone(&pool), 3, false).unwrap();
        let mut buffers = MixBuffers::new(1);
        renderer.render(&mut buffers, true, true);
        assert!(buffers.left[0].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_multi_core_matches_single_core_mix() {
        let playing = [1, 2, 5, 7];
        let single_pool = pool_with_voices(8, &playing);
        let multi_pool = pool_with_voices(8, &playing);
        let single = CoreRenderer::new(Arc::clone(&single_pool), 1, false).unwrap();
        let multi = CoreRenderer::new(Arc::clone(&multi_pool), 3, false).unwrap();

        let mut a = MixBuffers::new(1);
        let mut b = MixBuffers::new(1);
        single.render(&mut a, false, false);
        multi.render(&mut b, false, false);
        for (x, y) in a.left[0].iter().zip(b.left[0].iter()) {
            assert!((x - y).abs() < 1e-5);
        }
    }
}
