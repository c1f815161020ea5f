//! SoundFont stack management

use super::control::{update_presets, SynthControl};
use super::sealed::Sealed;
use crate::command::ReturnEvent;
use crate::error::{SynthError, SynthResult};
use crate::return_queue;
use crate::sfont::{SoundFont, SoundFontInfo, SoundFontLoader};
use std::sync::Arc;
use tracing::{error, info};

/// SoundFont operations available on both [`super::Synth`] and [`super::Renderer`]
pub trait SoundFontControl: SynthControl {
    /// Register a loader; it is tried before every loader added earlier
    fn add_sfloader(&mut self, loader: Arc<dyn SoundFontLoader>) {
        self.shared().library().add_loader(loader);
    }

    /// Load a SoundFont onto the top of the stack and return its id
    fn sfload(&mut self, filename: &str, reset_presets: bool) -> SynthResult<u32> {
        let id = {
            let mut library = self.shared().library();
            let font = library.load(filename)?;
            let id = library.next_id();
            library.insert(0, Arc::new(SoundFontInfo::new(id, font)));
            id
        };
        info!("Loaded SoundFont \"{}\" as id {}", filename, id);

        if reset_presets {
            self.program_reset()?;
        }
        Ok(id)
    }

    /// Take a SoundFont off the stack
    ///
    /// Channels are re-resolved (by program change with `reset_presets`, by
    /// their stored SoundFont id otherwise). The font is freed once the last
    /// channel preset referring to it has been released.
    fn sfunload(&mut self, id: u32, reset_presets: bool) -> SynthResult<()> {
        let removed = self.shared().library().remove(id);
        let Some((_, sfont)) = removed else {
            error!("No SoundFont with id = {}", id);
            return Err(SynthError::NotFound(format!("SoundFont {}", id)));
        };

        if reset_presets {
            self.program_reset()?;
        } else {
            update_presets(self)?;
        }

        return_queue::post_and_signal(self.shared(), ReturnEvent::UnrefSoundFont(sfont));
        Ok(())
    }

    /// Load a SoundFont's file again, keeping its id, stack position and bank offset
    ///
    /// The old font stays in place if the file can no longer be loaded.
    fn sfreload(&mut self, id: u32) -> SynthResult<()> {
        let old = {
            let mut library = self.shared().library();
            let Some(old) = library.by_id(id) else {
                error!("No SoundFont with id = {}", id);
                return Err(SynthError::NotFound(format!("SoundFont {}", id)));
            };
            let font = library.load(old.name())?;
            let Some((index, old)) = library.remove(id) else {
                return Err(SynthError::NotFound(format!("SoundFont {}", id)));
            };
            let sfont = SoundFontInfo::new(id, font);
            sfont.set_bank_offset(old.bank_offset());
            library.insert(index, Arc::new(sfont));
            old
        };

        update_presets(self)?;
        return_queue::post_and_signal(self.shared(), ReturnEvent::UnrefSoundFont(old));
        Ok(())
    }

    /// Put an already built SoundFont on top of the stack and return its id
    fn add_sfont(&mut self, font: Box<dyn SoundFont>) -> SynthResult<u32> {
        let id = {
            let mut library = self.shared().library();
            let id = library.next_id();
            library.insert(0, Arc::new(SoundFontInfo::new(id, font)));
            id
        };
        self.program_reset()?;
        Ok(id)
    }

    fn sfcount(&self) -> usize {
        self.shared().library().count()
    }

    /// SoundFont at stack position `index` (0 = top)
    fn get_sfont(&self, index: usize) -> Option<Arc<SoundFontInfo>> {
        self.shared().library().by_index(index)
    }

    fn get_sfont_by_id(&self, id: u32) -> Option<Arc<SoundFontInfo>> {
        self.shared().library().by_id(id)
    }

    fn get_sfont_by_name(&self, name: &str) -> Option<Arc<SoundFontInfo>> {
        self.shared().library().by_name(name)
    }

    /// Shift every bank number of a SoundFont by `offset`
    fn set_bank_offset(&mut self, id: u32, offset: i32) -> SynthResult<()> {
        let sfont = self.get_sfont_by_id(id).ok_or_else(|| {
            error!("No SoundFont with id = {}", id);
            SynthError::NotFound(format!("SoundFont {}", id))
        })?;
        sfont.set_bank_offset(offset);
        Ok(())
    }

    fn get_bank_offset(&self, id: u32) -> SynthResult<i32> {
        self.get_sfont_by_id(id)
            .map(|sfont| sfont.bank_offset())
            .ok_or_else(|| {
                error!("No SoundFont with id = {}", id);
                SynthError::NotFound(format!("SoundFont {}", id))
            })
    }
}

impl<T: Sealed + ?Sized> SoundFontControl for T {}
