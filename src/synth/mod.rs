//! The synthesizer: a cloneable control handle and a rendering token
//!
//! [`Synth::new`] returns two halves:
//!
//! - [`Synth`], a cheap handle any thread may clone and use. Its operations
//!   validate their arguments, update shadow values other threads read, and
//!   queue a [`Command`] on the calling thread's command queue.
//! - [`Renderer`], owned by whichever thread renders audio. The same
//!   operations called on it apply immediately, and its `write_*` methods
//!   drain every queue before each block.
//!
//! Both implement [`SynthControl`], [`TuningControl`] and
//! [`SoundFontControl`], so calling code is written once against the traits.

mod control;
mod renderer;
mod sfont_api;
mod tuning_api;

pub use control::SynthControl;
pub use renderer::{NoteOnContext, Renderer};
pub use sfont_api::SoundFontControl;
pub use tuning_api::TuningControl;

use crate::builtin_font::SineFontLoader;
use crate::channel::ChannelControls;
use crate::command::Command;
use crate::command_queue::CommandQueues;
use crate::config::SynthSettings;
use crate::error::{SynthError, SynthResult};
use crate::fx::{ChorusParams, ReverbParams};
use crate::return_queue::{self, ReclaimSnapshot, ReturnQueue};
use crate::sfont::Library;
use crate::wav_font::WavFontLoader;
use crossbeam::atomic::AtomicCell;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info};

/// State shared by every handle, the renderer and the background threads
pub struct SynthShared {
    pub(crate) settings: SynthSettings,
    pub(crate) queues: Arc<CommandQueues>,
    pub(crate) returns: ReturnQueue,
    library: Mutex<Library>,
    pub(crate) channels: Box<[Arc<ChannelControls>]>,
    pub(crate) gain: AtomicCell<f32>,
    pub(crate) polyphony: AtomicUsize,
    pub(crate) active_voices: AtomicUsize,
    pub(crate) cpu_load: AtomicCell<f32>,
    pub(crate) reverb: AtomicCell<ReverbParams>,
    pub(crate) chorus: AtomicCell<ChorusParams>,
    pub(crate) reverb_on: AtomicBool,
    pub(crate) chorus_on: AtomicBool,
    pub(crate) device_id: AtomicU8,
}

impl SynthShared {
    fn new(settings: SynthSettings) -> Self {
        let channels = (0..settings.midi_channels)
            .map(|n| Arc::new(ChannelControls::new(n)))
            .collect();
        Self {
            queues: Arc::new(CommandQueues::new(settings.max_queues, settings.queue_capacity)),
            returns: ReturnQueue::new(settings.return_queue_capacity),
            library: Mutex::new(Library::default()),
            channels,
            gain: AtomicCell::new(settings.gain),
            polyphony: AtomicUsize::new(settings.polyphony),
            active_voices: AtomicUsize::new(0),
            cpu_load: AtomicCell::new(0.0),
            reverb: AtomicCell::new(settings.reverb),
            chorus: AtomicCell::new(settings.chorus),
            reverb_on: AtomicBool::new(settings.reverb_active),
            chorus_on: AtomicBool::new(settings.chorus_active),
            device_id: AtomicU8::new(settings.device_id),
            settings,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::new(SynthSettings::default())
    }

    pub fn settings(&self) -> &SynthSettings {
        &self.settings
    }

    /// The library lock guarding loaders, the SoundFont stack and tunings
    pub(crate) fn library(&self) -> MutexGuard<'_, Library> {
        self.library.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Controls of a validated channel
    pub(crate) fn channel(&self, chan: usize) -> SynthResult<&Arc<ChannelControls>> {
        self.channels.get(chan).ok_or_else(|| {
            SynthError::InvalidArgument(format!(
                "channel {} out of range (0..{})",
                chan,
                self.channels.len()
            ))
        })
    }

    pub(crate) fn verbose(&self) -> bool {
        self.settings.verbose
    }

    pub fn reclaim_stats(&self) -> ReclaimSnapshot {
        self.returns.stats()
    }
}

pub(crate) mod sealed {
    use super::SynthShared;
    use crate::command::Command;
    use crate::error::SynthResult;

    /// Where a control operation's command goes
    pub trait Sealed {
        fn shared(&self) -> &SynthShared;
        fn submit(&mut self, cmd: Command) -> SynthResult<()>;
    }
}

/// Cloneable handle for controlling a synth from any thread
#[derive(Clone)]
pub struct Synth {
    shared: Arc<SynthShared>,
}

impl Synth {
    /// Build a synth from settings, starting its worker and reclaim threads
    pub fn new(settings: &SynthSettings) -> SynthResult<(Synth, Renderer)> {
        let settings = settings.validated()?;
        let shared = Arc::new(SynthShared::new(settings));
        {
            let mut library = shared.library();
            library.add_loader(Arc::new(WavFontLoader));
            library.add_loader(Arc::new(SineFontLoader));
        }

        let renderer = Renderer::new(Arc::clone(&shared))?;
        let s = &shared.settings;
        info!(
            "Synth started: {} Hz, {} voices, {} MIDI channels, {} core(s)",
            s.sample_rate, s.polyphony, s.midi_channels, s.cpu_cores
        );
        Ok((Synth { shared }, renderer))
    }

    pub fn settings(&self) -> &SynthSettings {
        &self.shared.settings
    }

    /// Counters of the background reclaim thread
    pub fn reclaim_stats(&self) -> ReclaimSnapshot {
        self.shared.reclaim_stats()
    }

    pub(crate) fn from_shared(shared: Arc<SynthShared>) -> Self {
        Self { shared }
    }
}

impl sealed::Sealed for Synth {
    fn shared(&self) -> &SynthShared {
        &self.shared
    }

    fn submit(&mut self, cmd: Command) -> SynthResult<()> {
        let queue = match self.shared.queues.current_thread_queue() {
            Ok(queue) => queue,
            Err(e) => {
                release_undelivered(&self.shared, cmd);
                return Err(e);
            }
        };
        queue.send(cmd).map_err(|cmd| {
            error!("Synthesis event queue full");
            release_undelivered(&self.shared, cmd);
            SynthError::QueueFull
        })
    }
}

/// Give back the references owned by a command that never reached the renderer
fn release_undelivered(shared: &SynthShared, cmd: Command) {
    if let Some(event) = cmd.into_release() {
        return_queue::post_and_signal(shared, event);
    }
}

impl std::fmt::Debug for Synth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synth")
            .field("midi_channels", &self.shared.channels.len())
            .field("polyphony", &self.shared.polyphony.load(Ordering::Relaxed))
            .finish()
    }
}

/// Check a 7-bit MIDI data value
pub(crate) fn data7(value: u32, what: &str) -> SynthResult<u8> {
    u8::try_from(value)
        .ok()
        .filter(|v| *v < 128)
        .ok_or_else(|| SynthError::InvalidArgument(format!("{} {} out of range (0..128)", what, value)))
}
