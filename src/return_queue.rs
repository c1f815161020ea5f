//! Deferred reclamation on a background thread
//!
//! Dropping a preset or SoundFont can run loader teardown code and takes the
//! library lock; the rendering thread must never do either. It posts a
//! [`ReturnEvent`] instead and a dedicated `synth-return` thread performs the
//! work. The same thread publishes reverb/chorus parameters back into the
//! shadow copies other threads read.
//!
//! If the queue is full the poster reclaims synchronously and logs an error.

use crate::command::ReturnEvent;
use crate::error::{SynthError, SynthResult};
use crate::sfont::SoundFontInfo;
use crate::synth::SynthShared;
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Counters of reclamation work, for monitoring and tests
#[derive(Debug, Default)]
pub struct ReclaimStats {
    events: AtomicU64,
    tunings_freed: AtomicU64,
    presets_freed: AtomicU64,
    soundfonts_freed: AtomicU64,
    sync_fallbacks: AtomicU64,
}

/// Point-in-time copy of [`ReclaimStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimSnapshot {
    /// Events processed (background and synchronous)
    pub events: u64,
    /// Tunings whose reference count reached zero
    pub tunings_freed: u64,
    pub presets_freed: u64,
    /// SoundFonts whose reference count reached zero
    pub soundfonts_freed: u64,
    /// Events reclaimed synchronously because the queue was full
    pub sync_fallbacks: u64,
}

impl ReclaimStats {
    pub fn snapshot(&self) -> ReclaimSnapshot {
        ReclaimSnapshot {
            events: self.events.load(Ordering::Acquire),
            tunings_freed: self.tunings_freed.load(Ordering::Acquire),
            presets_freed: self.presets_freed.load(Ordering::Acquire),
            soundfonts_freed: self.soundfonts_freed.load(Ordering::Acquire),
            sync_fallbacks: self.sync_fallbacks.load(Ordering::Acquire),
        }
    }
}

/// Bounded queue from the rendering thread to the reclaim thread
pub struct ReturnQueue {
    queue: ArrayQueue<ReturnEvent>,
    running: Mutex<bool>,
    cond: Condvar,
    stats: ReclaimStats,
}

impl ReturnQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            running: Mutex::new(true),
            cond: Condvar::new(),
            stats: ReclaimStats::default(),
        }
    }

    /// Enqueue without blocking; a full queue hands the event back
    pub fn post(&self, event: ReturnEvent) -> Result<(), ReturnEvent> {
        self.queue.push(event)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Wake the reclaim thread
    pub fn signal(&self) {
        let _running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }

    pub fn stats(&self) -> ReclaimSnapshot {
        self.stats.snapshot()
    }

    fn stop(&self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        *running = false;
        self.cond.notify_all();
    }
}

/// Post `event`, reclaiming it on the calling thread if the queue is full
pub(crate) fn post_or_reclaim(shared: &SynthShared, event: ReturnEvent) {
    if let Err(event) = shared.returns.post(event) {
        error!("Synth return event queue full");
        shared.returns.stats.sync_fallbacks.fetch_add(1, Ordering::AcqRel);
        reclaim(shared, event);
    }
}

/// Post from a control thread and wake the reclaim thread right away
pub(crate) fn post_and_signal(shared: &SynthShared, event: ReturnEvent) {
    post_or_reclaim(shared, event);
    shared.returns.signal();
}

/// Perform the work one event describes
pub(crate) fn reclaim(shared: &SynthShared, event: ReturnEvent) {
    let stats = &shared.returns.stats;
    stats.events.fetch_add(1, Ordering::AcqRel);

    match event {
        ReturnEvent::ReverbSync { mask, params } => {
            let mut current = shared.reverb.load();
            current.apply(mask, &params);
            shared.reverb.store(current);
        }
        ReturnEvent::ChorusSync { mask, params } => {
            let mut current = shared.chorus.load();
            current.apply(mask, &params);
            shared.chorus.store(current);
        }
        ReturnEvent::FreePreset(channel_preset) => {
            {
                let _library = shared.library();
                drop(channel_preset.preset);
            }
            stats.presets_freed.fetch_add(1, Ordering::AcqRel);
            unref_sfont(stats, channel_preset.sfont);
        }
        ReturnEvent::UnrefSoundFont(sfont) => unref_sfont(stats, sfont),
        ReturnEvent::UnrefTuning { tuning, count } => {
            if tuning.unref(count) {
                debug!(
                    "Freed tuning \"{}\" (bank {}, prog {})",
                    tuning.name(),
                    tuning.bank(),
                    tuning.prog()
                );
                stats.tunings_freed.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
}

fn unref_sfont(stats: &ReclaimStats, sfont: Arc<SoundFontInfo>) {
    if sfont.unref() {
        info!("Unloaded SoundFont \"{}\" (id {})", sfont.name(), sfont.id());
        stats.soundfonts_freed.fetch_add(1, Ordering::AcqRel);
    }
}

/// Owner of the background reclaim thread; stops and joins it on drop
pub struct Reclaimer {
    shared: Arc<SynthShared>,
    handle: Option<JoinHandle<()>>,
}

impl Reclaimer {
    pub fn spawn(shared: Arc<SynthShared>) -> SynthResult<Self> {
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("synth-return".to_string())
            .spawn(move || run(&worker_shared))
            .map_err(|e| SynthError::ThreadSpawn(format!("synth-return: {}", e)))?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }
}

fn run(shared: &SynthShared) {
    let returns = &shared.returns;
    loop {
        while let Some(event) = returns.queue.pop() {
            reclaim(shared, event);
        }

        let running = returns.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !*running {
            break;
        }
        if returns.queue.is_empty() {
            drop(returns.cond.wait(running).unwrap_or_else(PoisonError::into_inner));
        }
    }

    // Anything posted while stopping
    while let Some(event) = returns.queue.pop() {
        reclaim(shared, event);
    }
    debug!("Return thread exiting");
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        self.shared.returns.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Return thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::{reverb_mask, ReverbParams};
    use crate::tuning::Tuning;

    #[test]
    fn test_queue_bound() {
        let queue = ReturnQueue::new(2);
        let tuning = Arc::new(Tuning::new("t", 0, 0));
        let event = || ReturnEvent::UnrefTuning {
            tuning: Arc::clone(&tuning),
            count: 1,
        };
        assert!(queue.post(event()).is_ok());
        assert!(queue.post(event()).is_ok());
        assert!(queue.post(event()).is_err());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_sync_reclaim_frees_tuning_once() {
        let shared = SynthShared::for_tests();
        let tuning = Arc::new(Tuning::new("t", 0, 0));
        tuning.add_ref();
        reclaim(
            &shared,
            ReturnEvent::UnrefTuning {
                tuning: Arc::clone(&tuning),
                count: 1,
            },
        );
        assert_eq!(shared.returns.stats().tunings_freed, 0);
        reclaim(
            &shared,
            ReturnEvent::UnrefTuning {
                tuning: Arc::clone(&tuning),
                count: 1,
            },
        );
        assert_eq!(shared.returns.stats().tunings_freed, 1);
        assert_eq!(tuning.refcount(), 0);
    }

    #[test]
    fn test_reverb_sync_updates_shadow() {
        let shared = SynthShared::for_tests();
        let params = ReverbParams {
            roomsize: 0.77,
            ..ReverbParams::default()
        };
        reclaim(
            &shared,
            ReturnEvent::ReverbSync {
                mask: reverb_mask::ROOMSIZE,
                params,
            },
        );
        assert_eq!(shared.reverb.load().roomsize, 0.77);
    }

    #[test]
    fn test_background_thread_drains_on_stop() {
        let shared = Arc::new(SynthShared::for_tests());
        let reclaimer = Reclaimer::spawn(Arc::clone(&shared)).unwrap();
        let tuning = Arc::new(Tuning::new("t", 0, 0));
        shared
            .returns
            .post(ReturnEvent::UnrefTuning {
                tuning: Arc::clone(&tuning),
                count: 1,
            })
            .unwrap();
        drop(reclaimer);
        assert_eq!(tuning.refcount(), 0);
        assert_eq!(shared.returns.stats().tunings_freed, 1);
    }
}
