//! SoundFont, preset and loader interfaces, and the SoundFont stack
//!
//! Loaders turn a file name into a [`SoundFont`]; a SoundFont hands out
//! [`Preset`]s by (bank, program); a preset knows how to start the voices for
//! one note. The [`Library`] keeps the loader list, the SoundFont stack (top of
//! stack first) and the tuning table, all behind the synth's single library
//! lock.

use crate::command::ChannelPreset;
use crate::error::{SynthError, SynthResult};
use crate::generator::GenSet;
use crate::synth::NoteOnContext;
use crate::tuning::TuningTable;
use crate::voice::Sample;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// An instrument that can start voices for a note
pub trait Preset: Send + Sync {
    fn name(&self) -> &str;
    fn bank(&self) -> u32;
    fn program(&self) -> u32;
    /// Start the voices for one note through `ctx`
    fn note_on(&self, ctx: &mut NoteOnContext<'_>, key: u8, vel: u8) -> SynthResult<()>;
}

/// A loaded instrument bank
pub trait SoundFont: Send + Sync {
    fn name(&self) -> &str;
    fn preset(&self, bank: u32, prog: u32) -> Option<Arc<dyn Preset>>;
    fn presets(&self) -> Vec<Arc<dyn Preset>>;
}

/// Turns a file name into a SoundFont, or declines it
pub trait SoundFontLoader: Send + Sync {
    fn load(&self, filename: &str) -> Option<Box<dyn SoundFont>>;
}

/// A SoundFont on the stack, with its id, bank offset and reference count
///
/// The stack owns one reference; every preset handed to a channel owns one.
pub struct SoundFontInfo {
    id: u32,
    font: Box<dyn SoundFont>,
    bank_offset: AtomicI32,
    refcount: AtomicI32,
}

impl SoundFontInfo {
    pub fn new(id: u32, font: Box<dyn SoundFont>) -> Self {
        Self {
            id,
            font,
            bank_offset: AtomicI32::new(0),
            refcount: AtomicI32::new(1),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        self.font.name()
    }

    pub fn font(&self) -> &dyn SoundFont {
        self.font.as_ref()
    }

    pub fn bank_offset(&self) -> i32 {
        self.bank_offset.load(Ordering::Relaxed)
    }

    pub fn set_bank_offset(&self, offset: i32) {
        self.bank_offset.store(offset, Ordering::Relaxed);
    }

    pub fn refcount(&self) -> i32 {
        self.refcount.load(Ordering::Acquire)
    }

    pub(crate) fn add_ref(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference, returning true when it was the last
    pub(crate) fn unref(&self) -> bool {
        self.refcount.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Look up a preset by bank (before the offset is removed) and program
    pub fn preset(&self, bank: u32, prog: u32) -> Option<Arc<dyn Preset>> {
        let bank = bank as i64 - self.bank_offset() as i64;
        if bank < 0 {
            return None;
        }
        self.font.preset(bank as u32, prog)
    }
}

impl std::fmt::Debug for SoundFontInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundFontInfo")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("bank_offset", &self.bank_offset())
            .field("refcount", &self.refcount())
            .finish()
    }
}

/// One key/velocity region of a [`SamplePreset`]
#[derive(Debug, Clone)]
pub struct Zone {
    pub keys: RangeInclusive<u8>,
    pub vels: RangeInclusive<u8>,
    pub sample: Arc<Sample>,
    pub gens: GenSet,
}

impl Zone {
    /// A zone covering every key and velocity
    pub fn full(sample: Arc<Sample>, gens: GenSet) -> Self {
        Self {
            keys: 0..=127,
            vels: 0..=127,
            sample,
            gens,
        }
    }

    pub fn with_keys(mut self, keys: RangeInclusive<u8>) -> Self {
        self.keys = keys;
        self
    }
}

/// Preset made of sample zones, each starting one voice when it matches
#[derive(Debug)]
pub struct SamplePreset {
    name: String,
    bank: u32,
    program: u32,
    zones: Vec<Zone>,
}

impl SamplePreset {
    pub fn new(name: &str, bank: u32, program: u32, zones: Vec<Zone>) -> Self {
        Self {
            name: name.to_string(),
            bank,
            program,
            zones,
        }
    }
}

impl Preset for SamplePreset {
    fn name(&self) -> &str {
        &self.name
    }

    fn bank(&self) -> u32 {
        self.bank
    }

    fn program(&self) -> u32 {
        self.program
    }

    fn note_on(&self, ctx: &mut NoteOnContext<'_>, key: u8, vel: u8) -> SynthResult<()> {
        for zone in self
            .zones
            .iter()
            .filter(|z| z.keys.contains(&key) && z.vels.contains(&vel))
        {
            ctx.start_voice(key, vel, &zone.sample, &zone.gens)?;
        }
        Ok(())
    }
}

/// In-memory SoundFont of [`SamplePreset`]s
#[derive(Debug)]
pub struct SampleFont {
    name: String,
    presets: Vec<Arc<SamplePreset>>,
}

impl SampleFont {
    pub fn new(name: &str, presets: Vec<SamplePreset>) -> Self {
        Self {
            name: name.to_string(),
            presets: presets.into_iter().map(Arc::new).collect(),
        }
    }
}

impl SoundFont for SampleFont {
    fn name(&self) -> &str {
        &self.name
    }

    fn preset(&self, bank: u32, prog: u32) -> Option<Arc<dyn Preset>> {
        self.presets
            .iter()
            .find(|p| p.bank == bank && p.program == prog)
            .map(|p| Arc::clone(p) as Arc<dyn Preset>)
    }

    fn presets(&self) -> Vec<Arc<dyn Preset>> {
        self.presets
            .iter()
            .map(|p| Arc::clone(p) as Arc<dyn Preset>)
            .collect()
    }
}

/// Loaders, the SoundFont stack and the tuning table
#[derive(Default)]
pub struct Library {
    loaders: Vec<Arc<dyn SoundFontLoader>>,
    fonts: Vec<Arc<SoundFontInfo>>,
    last_id: u32,
    pub(crate) tunings: TuningTable,
}

impl Library {
    /// Register a loader; the newest loader is tried first
    pub fn add_loader(&mut self, loader: Arc<dyn SoundFontLoader>) {
        self.loaders.insert(0, loader);
    }

    pub fn next_id(&mut self) -> u32 {
        self.last_id += 1;
        self.last_id
    }

    /// Try every loader in turn
    pub fn load(&self, filename: &str) -> SynthResult<Box<dyn SoundFont>> {
        for loader in &self.loaders {
            if let Some(font) = loader.load(filename) {
                debug!("Loaded SoundFont \"{}\"", filename);
                return Ok(font);
            }
        }
        error!("Failed to load SoundFont \"{}\"", filename);
        Err(SynthError::LoadFailed(filename.to_string()))
    }

    /// Put a font at `index` on the stack (0 = top)
    pub fn insert(&mut self, index: usize, sfont: Arc<SoundFontInfo>) {
        let index = index.min(self.fonts.len());
        self.fonts.insert(index, sfont);
    }

    /// Take a font off the stack, returning its position
    pub fn remove(&mut self, id: u32) -> Option<(usize, Arc<SoundFontInfo>)> {
        let index = self.fonts.iter().position(|f| f.id() == id)?;
        Some((index, self.fonts.remove(index)))
    }

    pub fn count(&self) -> usize {
        self.fonts.len()
    }

    pub fn by_index(&self, index: usize) -> Option<Arc<SoundFontInfo>> {
        self.fonts.get(index).cloned()
    }

    pub fn by_id(&self, id: u32) -> Option<Arc<SoundFontInfo>> {
        self.fonts.iter().find(|f| f.id() == id).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<SoundFontInfo>> {
        self.fonts.iter().find(|f| f.name() == name).cloned()
    }

    /// Search the stack top-down; a hit takes a SoundFont reference
    pub fn find_preset(&self, bank: u32, prog: u32) -> Option<ChannelPreset> {
        self.fonts
            .iter()
            .find_map(|sfont| Self::take_preset(sfont, bank, prog))
    }

    /// Preset from one SoundFont by id; a hit takes a SoundFont reference
    pub fn get_preset(&self, sfont_id: u32, bank: u32, prog: u32) -> Option<ChannelPreset> {
        let sfont = self.fonts.iter().find(|f| f.id() == sfont_id)?;
        Self::take_preset(sfont, bank, prog)
    }

    /// Preset from one SoundFont by name; a hit takes a SoundFont reference
    pub fn get_preset_by_name(&self, name: &str, bank: u32, prog: u32) -> Option<ChannelPreset> {
        let sfont = self.fonts.iter().find(|f| f.name() == name)?;
        Self::take_preset(sfont, bank, prog)
    }

    fn take_preset(sfont: &Arc<SoundFontInfo>, bank: u32, prog: u32) -> Option<ChannelPreset> {
        let preset = sfont.preset(bank, prog)?;
        sfont.add_ref();
        Some(ChannelPreset {
            preset,
            sfont: Arc::clone(sfont),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn font(name: &str, presets: &[(u32, u32)]) -> Box<dyn SoundFont> {
        let sample = Arc::new(Sample::sine("sine", 64, 69, 440.0));
        let presets = presets
            .iter()
            .map(|&(bank, prog)| {
                SamplePreset::new(
                    &format!("{}-{}-{}", name, bank, prog),
                    bank,
                    prog,
                    vec![Zone::full(Arc::clone(&sample), GenSet::default())],
                )
            })
            .collect();
        Box::new(SampleFont::new(name, presets))
    }

    #[test]
    fn test_stack_lookup_is_top_down() {
        let mut library = Library::default();
        let low = library.next_id();
        library.insert(0, Arc::new(SoundFontInfo::new(low, font("low", &[(0, 0), (0, 1)]))));
        let high = library.next_id();
        library.insert(0, Arc::new(SoundFontInfo::new(high, font("high", &[(0, 0)]))));

        let hit = library.find_preset(0, 0).unwrap();
        assert_eq!(hit.sfont.id(), high);
        assert_eq!(hit.sfont.refcount(), 2);

        let hit = library.find_preset(0, 1).unwrap();
        assert_eq!(hit.sfont.id(), low);
        assert!(library.find_preset(1, 0).is_none());
    }

    #[test]
    fn test_bank_offset() {
        let mut library = Library::default();
        let id = library.next_id();
        let info = Arc::new(SoundFontInfo::new(id, font("f", &[(0, 5)])));
        info.set_bank_offset(2);
        library.insert(0, info);
        assert!(library.find_preset(0, 5).is_none());
        assert_eq!(library.find_preset(2, 5).unwrap().preset.program(), 5);
    }

    #[test]
    fn test_remove_reports_position() {
        let mut library = Library::default();
        for name in ["a", "b", "c"] {
            let id = library.next_id();
            library.insert(0, Arc::new(SoundFontInfo::new(id, font(name, &[]))));
        }
        // Stack is c, b, a with ids 3, 2, 1
        let (index, info) = library.remove(2).unwrap();
        assert_eq!(index, 1);
        assert_eq!(info.name(), "b");
        assert_eq!(library.count(), 2);
        assert!(library.remove(2).is_none());
    }

    #[test]
    fn test_unref_reports_last() {
        let info = SoundFontInfo::new(1, font("f", &[]));
        info.add_ref();
        assert!(!info.unref());
        assert!(info.unref());
    }

    #[test]
    fn test_no_loader_fails() {
        let library = Library::default();
        assert!(matches!(
            library.load("missing.sf2"),
            Err(SynthError::LoadFailed(_))
        ));
    }
}
