//! # Phonon Synth - Realtime Polyphonic Synthesis Core
//!
//! A SoundFont-style synthesizer built for live use: any number of threads
//! send MIDI and control changes while one thread renders audio, and no
//! control call ever blocks the renderer or makes it free memory.
//!
//! ## Architecture
//!
//! ```text
//!  control threads                       render thread               worker threads
//!  ───────────────                       ─────────────               ──────────────
//!  Synth::note_on ─┐
//!  Synth::cc ──────┼─► per-thread ring ─► Renderer::write_* ──────┐
//!  Synth::sfload ──┘   command queues      drain all queues        │   claim voices by
//!        │                                 apply commands          ├─► CAS on a shared
//!        │ shadow values                   render 64-frame block ──┘   index, mix into
//!        ▼ (cc, bank, gain, fx)            reverb / chorus             private buffers
//!  readable at once                              │
//!                                                ▼
//!                               return queue ─► reclaim thread
//!                               (old presets, tunings, fonts)  drops the last refs
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use phonon_synth::prelude::*;
//!
//! let settings = SynthSettings::default();
//! let (mut synth, mut renderer) = Synth::new(&settings).unwrap();
//! synth.sfload("builtin:sine", true).unwrap();
//! synth.note_on(0, 60, 100).unwrap();
//!
//! let mut left = vec![0.0f32; 512];
//! let mut right = vec![0.0f32; 512];
//! renderer.write_float(&mut left, &mut right).unwrap();
//! ```
//!
//! ## Threads
//!
//! - **Control**: anything holding a [`Synth`] clone. Each thread gets its own
//!   single-producer ring queue the first time it sends a command.
//! - **Render**: whoever owns the [`Renderer`]. The same control traits are
//!   implemented on it and apply commands directly.
//! - **Workers**: `cpu_cores - 1` helpers render voices alongside the render
//!   thread, synchronised by a barrier per block.
//! - **Reclaim**: frees what the render thread lets go of, outside the audio path.

pub mod builtin_font;
pub mod channel;
pub mod command;
pub mod command_queue;
pub mod config;
pub mod core_render;
pub mod dither;
pub mod error;
pub mod fx;
pub mod generator;
pub mod midi;
pub mod return_queue;
pub mod sfont;
pub mod synth;
pub mod sysex;
pub mod tuning;
pub mod voice;
pub mod voice_pool;
pub mod wav_font;

pub use config::SynthSettings;
pub use error::{SynthError, SynthResult};
pub use midi::{MidiEvent, MidiEventType};
pub use synth::{NoteOnContext, Renderer, SoundFontControl, Synth, SynthControl, TuningControl};
pub use sysex::SysexReply;

/// Everything needed to drive a synth
pub mod prelude {
    pub use crate::builtin_font::BUILTIN_SINE;
    pub use crate::channel::{ChannelInfo, PresetInfo};
    pub use crate::config::SynthSettings;
    pub use crate::error::{SynthError, SynthResult};
    pub use crate::fx::{chorus_mask, reverb_mask, ChorusParams, ChorusWaveform, ReverbParams};
    pub use crate::generator::GenType;
    pub use crate::midi::{MidiEvent, MidiEventType};
    pub use crate::sfont::{Preset, SoundFont, SoundFontInfo, SoundFontLoader};
    pub use crate::synth::{NoteOnContext, Renderer, SoundFontControl, Synth, SynthControl, TuningControl};
    pub use crate::sysex::SysexReply;
    pub use crate::voice::{VoiceInfo, BLOCK_SIZE};
}
