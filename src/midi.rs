//! MIDI event types and controller numbers

/// MIDI channel voice and system message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MidiEventType {
    NoteOff,
    NoteOn,
    KeyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
    SystemReset,
    Sysex,
}

impl MidiEventType {
    /// Decode a status byte (channel nibble ignored)
    pub fn from_status(status: u8) -> Option<Self> {
        match status {
            0xFF => Some(MidiEventType::SystemReset),
            0xF0 => Some(MidiEventType::Sysex),
            s => match s & 0xF0 {
                0x80 => Some(MidiEventType::NoteOff),
                0x90 => Some(MidiEventType::NoteOn),
                0xA0 => Some(MidiEventType::KeyPressure),
                0xB0 => Some(MidiEventType::ControlChange),
                0xC0 => Some(MidiEventType::ProgramChange),
                0xD0 => Some(MidiEventType::ChannelPressure),
                0xE0 => Some(MidiEventType::PitchBend),
                _ => None,
            },
        }
    }
}

/// One MIDI event as handed to [`crate::SynthControl::handle_midi_event`]
#[derive(Debug, Clone, PartialEq)]
pub struct MidiEvent {
    pub kind: MidiEventType,
    pub channel: usize,
    pub param1: u32,
    pub param2: u32,
    /// Sysex payload without the framing 0xF0/0xF7 bytes
    pub sysex: Vec<u8>,
}

impl MidiEvent {
    pub fn new(kind: MidiEventType, channel: usize, param1: u32, param2: u32) -> Self {
        Self {
            kind,
            channel,
            param1,
            param2,
            sysex: Vec::new(),
        }
    }

    pub fn note_on(channel: usize, key: u32, vel: u32) -> Self {
        Self::new(MidiEventType::NoteOn, channel, key, vel)
    }

    pub fn note_off(channel: usize, key: u32) -> Self {
        Self::new(MidiEventType::NoteOff, channel, key, 0)
    }

    pub fn control_change(channel: usize, ctrl: u32, value: u32) -> Self {
        Self::new(MidiEventType::ControlChange, channel, ctrl, value)
    }

    pub fn sysex(data: &[u8]) -> Self {
        Self {
            sysex: data.to_vec(),
            ..Self::new(MidiEventType::Sysex, 0, 0, 0)
        }
    }

    /// Parse a raw 1-3 byte channel message
    ///
    /// Pitch bend data bytes are combined into one 14-bit value in `param1`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&status, data) = bytes.split_first()?;
        let kind = MidiEventType::from_status(status)?;
        let channel = (status & 0x0F) as usize;
        let d1 = data.first().copied().unwrap_or(0) as u32 & 0x7F;
        let d2 = data.get(1).copied().unwrap_or(0) as u32 & 0x7F;

        let event = match kind {
            MidiEventType::SystemReset => Self::new(kind, 0, 0, 0),
            MidiEventType::Sysex => {
                let end = data.iter().position(|&b| b == 0xF7).unwrap_or(data.len());
                Self::sysex(&data[..end])
            }
            MidiEventType::PitchBend => Self::new(kind, channel, (d2 << 7) | d1, 0),
            _ => Self::new(kind, channel, d1, d2),
        };
        Some(event)
    }
}

/// Controller numbers with special handling
pub mod cc {
    pub const BANK_SELECT_MSB: u8 = 0;
    pub const MODULATION_MSB: u8 = 1;
    pub const DATA_ENTRY_MSB: u8 = 6;
    pub const VOLUME_MSB: u8 = 7;
    pub const PAN_MSB: u8 = 10;
    pub const EXPRESSION_MSB: u8 = 11;
    pub const BANK_SELECT_LSB: u8 = 32;
    pub const DATA_ENTRY_LSB: u8 = 38;
    pub const SUSTAIN_SWITCH: u8 = 64;
    pub const NRPN_LSB: u8 = 98;
    pub const NRPN_MSB: u8 = 99;
    pub const RPN_LSB: u8 = 100;
    pub const RPN_MSB: u8 = 101;
    pub const ALL_SOUND_OFF: u8 = 120;
    pub const ALL_CTRL_OFF: u8 = 121;
    pub const ALL_NOTES_OFF: u8 = 123;
}

/// Registered parameter numbers
pub mod rpn {
    pub const PITCH_BEND_RANGE: u16 = 0;
    pub const CHANNEL_FINE_TUNE: u16 = 1;
    pub const CHANNEL_COARSE_TUNE: u16 = 2;
    pub const TUNING_PROGRAM_CHANGE: u16 = 3;
    pub const TUNING_BANK_SELECT: u16 = 4;
    pub const MODULATION_DEPTH_RANGE: u16 = 5;
}

/// NRPN MSB that addresses SoundFont generators
pub const NRPN_SOUNDFONT_MSB: u8 = 120;

/// MIDI channel that always selects the percussion bank
pub const DRUM_CHANNEL: usize = 9;
/// Bank number of percussion presets
pub const DRUM_BANK: u32 = 128;
