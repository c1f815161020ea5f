//! Commands sent to the rendering thread and events sent back from it
//!
//! Commands that carry a reference-counted object (a preset or a tuning) own
//! one logical reference to it. Applying the command transfers that reference
//! to the receiving channel. A command that is dropped undelivered must give
//! its reference back through [`Command::into_release`].

use crate::channel::PresetInfo;
use crate::fx::{ChorusParams, ReverbParams};
use crate::generator::GenType;
use crate::midi::MidiEventType;
use crate::sfont::{Preset, SoundFontInfo};
use crate::tuning::Tuning;
use std::fmt;
use std::sync::Arc;

/// A preset together with the SoundFont it came from
///
/// Holding a `ChannelPreset` means holding one reference on the SoundFont.
#[derive(Clone)]
pub struct ChannelPreset {
    pub preset: Arc<dyn Preset>,
    pub sfont: Arc<SoundFontInfo>,
}

impl ChannelPreset {
    /// Shadow description published to other threads
    pub fn info(&self) -> PresetInfo {
        PresetInfo {
            name: self.preset.name().to_string(),
            sfont_id: self.sfont.id(),
            bank: self.preset.bank(),
            program: self.preset.program(),
        }
    }
}

impl fmt::Debug for ChannelPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelPreset")
            .field("name", &self.preset.name())
            .field("bank", &self.preset.bank())
            .field("program", &self.preset.program())
            .field("sfont_id", &self.sfont.id())
            .finish()
    }
}

/// A state change requested by any thread, applied on the rendering thread
#[derive(Debug)]
pub enum Command {
    /// MIDI channel event; controller values are already stored in the channel
    Midi {
        kind: MidiEventType,
        chan: usize,
        param1: u32,
        param2: u32,
    },
    /// Channel generator offset or absolute value
    SetGen {
        chan: usize,
        gen: GenType,
        value: f32,
        absolute: bool,
    },
    /// Push the current master gain to every voice
    UpdateGain,
    /// Apply the current polyphony limit
    UpdatePolyphony,
    /// Note-off for every voice of a group
    StopVoices(u32),
    /// Assign a channel's preset (`None` unsets it)
    SetPreset {
        chan: usize,
        preset: Option<ChannelPreset>,
    },
    Reverb {
        mask: u32,
        params: ReverbParams,
    },
    Chorus {
        mask: u32,
        params: ChorusParams,
    },
    /// Assign a channel's tuning (`None` deactivates)
    SetTuning {
        chan: usize,
        tuning: Option<Arc<Tuning>>,
        apply: bool,
    },
    /// Move every channel using `old` over to `new`
    ///
    /// The command owns one reference on `new`, released once applied.
    ReplaceTuning {
        old: Arc<Tuning>,
        new: Arc<Tuning>,
        apply: bool,
    },
}

impl Command {
    /// MIDI channel the command addresses, if any
    pub fn channel(&self) -> Option<usize> {
        match self {
            Command::Midi { chan, .. }
            | Command::SetGen { chan, .. }
            | Command::SetPreset { chan, .. }
            | Command::SetTuning { chan, .. } => Some(*chan),
            _ => None,
        }
    }

    /// The return events that give back the references an undelivered command owns
    pub fn into_release(self) -> Option<ReturnEvent> {
        match self {
            Command::SetPreset {
                preset: Some(preset),
                ..
            } => Some(ReturnEvent::FreePreset(preset)),
            Command::SetTuning {
                tuning: Some(tuning),
                ..
            }
            | Command::ReplaceTuning { new: tuning, .. } => Some(ReturnEvent::UnrefTuning {
                tuning,
                count: 1,
            }),
            _ => None,
        }
    }
}

/// Work for the background reclaim thread
#[derive(Debug)]
pub enum ReturnEvent {
    /// Publish reverb parameters applied on the rendering thread
    ReverbSync { mask: u32, params: ReverbParams },
    /// Publish chorus parameters applied on the rendering thread
    ChorusSync { mask: u32, params: ChorusParams },
    /// Drop a preset, then one reference on its SoundFont
    FreePreset(ChannelPreset),
    /// Drop the registry reference of an unloaded SoundFont
    UnrefSoundFont(Arc<SoundFontInfo>),
    /// Drop `count` references on a tuning
    UnrefTuning { tuning: Arc<Tuning>, count: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_commands_release_nothing() {
        let cmd = Command::Midi {
            kind: MidiEventType::NoteOn,
            chan: 0,
            param1: 60,
            param2: 100,
        };
        assert!(cmd.into_release().is_none());
        assert!(Command::UpdateGain.into_release().is_none());
    }

    #[test]
    fn test_tuning_commands_release_their_reference() {
        let tuning = Arc::new(Tuning::new("t", 0, 0));
        let cmd = Command::SetTuning {
            chan: 0,
            tuning: Some(Arc::clone(&tuning)),
            apply: false,
        };
        match cmd.into_release() {
            Some(ReturnEvent::UnrefTuning { tuning: t, count }) => {
                assert!(Arc::ptr_eq(&t, &tuning));
                assert_eq!(count, 1);
            }
            other => panic!("unexpected release: {:?}", other),
        }
    }
}
