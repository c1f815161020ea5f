//! SoundFont generators used by the voice model
//!
//! Generator ids are the SoundFont 2 numbers, so NRPN generator addressing
//! (`120/<id>`) and channel offsets line up with instrument data. Only the
//! generators a [`crate::voice::Voice`] actually reads are modelled.

/// Size of a per-channel generator table (one past the highest SoundFont id)
pub const GEN_LAST: usize = 60;

/// Generators understood by the voice model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GenType {
    ChorusSend = 15,
    ReverbSend = 16,
    Pan = 17,
    DelayVolEnv = 33,
    AttackVolEnv = 34,
    HoldVolEnv = 35,
    DecayVolEnv = 36,
    SustainVolEnv = 37,
    ReleaseVolEnv = 38,
    Attenuation = 48,
    CoarseTune = 51,
    FineTune = 52,
    ScaleTune = 56,
    ExclusiveClass = 57,
    OverrideRootKey = 58,
}

/// Range, default and NRPN scaling of one generator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenInfo {
    pub min: f32,
    pub max: f32,
    pub default: f32,
    /// Multiplier applied to a centred (value - 8192) NRPN data entry
    pub nrpn_scale: f32,
}

const fn info(min: f32, max: f32, default: f32, nrpn_scale: f32) -> GenInfo {
    GenInfo {
        min,
        max,
        default,
        nrpn_scale,
    }
}

impl GenType {
    pub const ALL: [GenType; 15] = [
        GenType::ChorusSend,
        GenType::ReverbSend,
        GenType::Pan,
        GenType::DelayVolEnv,
        GenType::AttackVolEnv,
        GenType::HoldVolEnv,
        GenType::DecayVolEnv,
        GenType::SustainVolEnv,
        GenType::ReleaseVolEnv,
        GenType::Attenuation,
        GenType::CoarseTune,
        GenType::FineTune,
        GenType::ScaleTune,
        GenType::ExclusiveClass,
        GenType::OverrideRootKey,
    ];

    /// SoundFont generator number
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<GenType> {
        GenType::ALL.iter().copied().find(|g| g.index() == index)
    }

    pub fn info(self) -> GenInfo {
        match self {
            GenType::ChorusSend | GenType::ReverbSend => info(0.0, 1000.0, 0.0, 1.0),
            GenType::Pan => info(-500.0, 500.0, 0.0, 1.0),
            GenType::DelayVolEnv | GenType::HoldVolEnv => info(-12000.0, 5000.0, -12000.0, 2.0),
            GenType::AttackVolEnv | GenType::DecayVolEnv | GenType::ReleaseVolEnv => {
                info(-12000.0, 8000.0, -12000.0, 2.0)
            }
            GenType::SustainVolEnv | GenType::Attenuation => info(0.0, 1440.0, 0.0, 1.0),
            GenType::CoarseTune => info(-120.0, 120.0, 0.0, 0.0),
            GenType::FineTune => info(-99.0, 99.0, 0.0, 1.0),
            GenType::ScaleTune => info(0.0, 1200.0, 100.0, 1.0),
            GenType::ExclusiveClass => info(0.0, 127.0, 0.0, 0.0),
            GenType::OverrideRootKey => info(-1.0, 127.0, -1.0, 0.0),
        }
    }

    pub fn clamp(self, value: f32) -> f32 {
        let i = self.info();
        value.clamp(i.min, i.max)
    }

    /// Map a normalized 0..1 value onto the generator range
    pub fn denormalize(self, normalized: f32) -> f32 {
        let i = self.info();
        i.min + normalized.clamp(0.0, 1.0) * (i.max - i.min)
    }

    /// Scale a 14-bit NRPN data entry into a generator offset
    pub fn scale_nrpn(self, data: u32) -> f32 {
        let centred = (data.min(16383) as f32) - 8192.0;
        centred * self.info().nrpn_scale
    }
}

/// A full set of generator values, indexed by SoundFont number
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenSet {
    values: [f32; GEN_LAST],
}

impl Default for GenSet {
    fn default() -> Self {
        let mut values = [0.0; GEN_LAST];
        for gen in GenType::ALL {
            values[gen.index()] = gen.info().default;
        }
        Self { values }
    }
}

impl GenSet {
    pub fn get(&self, gen: GenType) -> f32 {
        self.values[gen.index()]
    }

    pub fn set(&mut self, gen: GenType, value: f32) {
        self.values[gen.index()] = value;
    }

    /// Builder-style setter for preset definitions
    pub fn with(mut self, gen: GenType, value: f32) -> Self {
        self.set(gen, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_match_soundfont_numbers() {
        assert_eq!(GenType::Pan.index(), 17);
        assert_eq!(GenType::Attenuation.index(), 48);
        assert_eq!(GenType::ExclusiveClass.index(), 57);
        assert!(GenType::ALL.iter().all(|g| g.index() < GEN_LAST));
        assert_eq!(GenType::from_index(52), Some(GenType::FineTune));
        assert_eq!(GenType::from_index(0), None);
    }

    #[test]
    fn test_nrpn_scaling() {
        assert_eq!(GenType::Pan.scale_nrpn(8192), 0.0);
        assert_eq!(GenType::Pan.scale_nrpn(8292), 100.0);
        assert_eq!(GenType::AttackVolEnv.scale_nrpn(8192 + 600), 1200.0);
        assert_eq!(GenType::ExclusiveClass.scale_nrpn(16383), 0.0);
    }

    #[test]
    fn test_denormalize() {
        assert_eq!(GenType::Pan.denormalize(0.5), 0.0);
        assert_eq!(GenType::Attenuation.denormalize(1.0), 1440.0);
        assert_eq!(GenType::FineTune.denormalize(-3.0), -99.0);
    }

    #[test]
    fn test_default_set() {
        let set = GenSet::default();
        assert_eq!(set.get(GenType::ScaleTune), 100.0);
        assert_eq!(set.get(GenType::OverrideRootKey), -1.0);
        assert_eq!(set.get(GenType::Pan), 0.0);
    }
}
