//! MIDI Tuning Standard system exclusive messages
//!
//! ```text
//!   F0 7E|7F <device> 08 <sub-id> [body] [checksum] F7
//!       |                 00  bulk dump request          <prog>
//!       |                 03  bulk dump request, bank    <bank> <prog>
//!       |                 02  note change                <prog> <n> n×(key semi msb lsb)
//!       |                 07  note change, bank          <bank> <prog> <n> n×(...)
//!       |                 08  scale/octave, 1 byte       <chan mask ×3> 12×cents
//!       |                 09  scale/octave, 2 bytes      <chan mask ×3> 12×(msb lsb)
//!       └─ 7F (realtime) retunes sounding voices
//! ```
//!
//! Data is passed without the framing F0/F7 bytes. Malformed messages are not
//! an error: they are reported as not handled.

use crate::error::{SynthError, SynthResult};
use crate::synth::TuningControl;
use crate::tuning::TUNING_KEYS;
use std::sync::atomic::Ordering;

const UNIV_NON_REALTIME: u8 = 0x7E;
const UNIV_REALTIME: u8 = 0x7F;
const DEVICE_ID_ALL: u8 = 0x7F;
const MIDI_TUNING_ID: u8 = 0x08;

const BULK_DUMP_REQ: u8 = 0x00;
const BULK_DUMP: u8 = 0x01;
const NOTE_TUNE: u8 = 0x02;
const BULK_DUMP_REQ_BANK: u8 = 0x03;
const NOTE_TUNE_BANK: u8 = 0x07;
const OCTAVE_TUNE_1BYTE: u8 = 0x08;
const OCTAVE_TUNE_2BYTE: u8 = 0x09;

/// Length of a bulk dump reply without a bank byte
pub const BULK_DUMP_LEN: usize = 406;
/// Length of a bulk dump reply with a bank byte
pub const BULK_DUMP_BANK_LEN: usize = 407;

const NAME_LEN: usize = 16;

/// Tuning slot written by octave tuning messages
pub const SYSEX_TUNING_NAME: &str = "SYSEX";

/// Outcome of a sysex message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SysexReply {
    /// The message was recognised and acted on (or would be, for a dry run)
    pub handled: bool,
    /// Reply to send back, for dump requests
    pub response: Option<Vec<u8>>,
}

impl SysexReply {
    fn handled() -> Self {
        Self {
            handled: true,
            response: None,
        }
    }
}

pub(crate) fn handle<C: TuningControl + ?Sized>(
    ctl: &mut C,
    data: &[u8],
    dryrun: bool,
) -> SynthResult<SysexReply> {
    if data.is_empty() {
        return Err(SynthError::InvalidArgument("empty sysex message".to_string()));
    }
    if data.len() < 4 {
        return Ok(SysexReply::default());
    }

    let device_id = ctl.shared().device_id.load(Ordering::Relaxed);
    let is_tuning = matches!(data[0], UNIV_NON_REALTIME | UNIV_REALTIME)
        && (data[1] == device_id || data[1] == DEVICE_ID_ALL)
        && data[2] == MIDI_TUNING_ID;
    if !is_tuning {
        return Ok(SysexReply::default());
    }

    let realtime = data[0] == UNIV_REALTIME;
    match data[3] {
        BULK_DUMP_REQ | BULK_DUMP_REQ_BANK => bulk_dump(ctl, data, device_id, dryrun),
        NOTE_TUNE | NOTE_TUNE_BANK => note_tune(ctl, data, realtime, dryrun),
        OCTAVE_TUNE_1BYTE | OCTAVE_TUNE_2BYTE => octave_tune(ctl, data, realtime, dryrun),
        _ => Ok(SysexReply::default()),
    }
}

fn is_data(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| b & 0x80 == 0)
}

fn bulk_dump<C: TuningControl + ?Sized>(
    ctl: &mut C,
    data: &[u8],
    device_id: u8,
    dryrun: bool,
) -> SynthResult<SysexReply> {
    let with_bank = data[3] == BULK_DUMP_REQ_BANK;
    let (bank, prog) = match (with_bank, data.len()) {
        (false, 5) if is_data(&data[4..5]) => (0, data[4]),
        (true, 6) if is_data(&data[4..6]) => (data[4], data[5]),
        _ => return Ok(SysexReply::default()),
    };
    if dryrun {
        return Ok(SysexReply::handled());
    }

    let Ok((name, pitches)) = ctl.tuning_dump(bank as u32, prog as u32) else {
        return Ok(SysexReply::default());
    };

    let len = if with_bank { BULK_DUMP_BANK_LEN } else { BULK_DUMP_LEN };
    let mut resp = Vec::with_capacity(len);
    resp.extend_from_slice(&[UNIV_NON_REALTIME, device_id, MIDI_TUNING_ID, BULK_DUMP]);
    if with_bank {
        resp.push(bank);
    }
    resp.push(prog);

    let mut name_bytes = [0u8; NAME_LEN];
    for (dst, src) in name_bytes.iter_mut().zip(name.bytes()) {
        *dst = src & 0x7F;
    }
    resp.extend_from_slice(&name_bytes);

    let data_start = resp.len();
    for &pitch in pitches.iter() {
        let note = ((pitch / 100.0) as i32).clamp(0, 127);
        let frac = (((pitch - note as f64 * 100.0) * 16384.0 + 50.0) / 100.0) as i32;
        let frac = frac.clamp(0, 16383);
        resp.extend_from_slice(&[note as u8, (frac >> 7) as u8, (frac & 0x7F) as u8]);
    }

    let checksum = if with_bank {
        resp[1..].iter().fold(0u8, |acc, b| acc ^ b)
    } else {
        // The non-bank form only covers the fixed header fields and tuning data
        resp[data_start..]
            .iter()
            .fold(UNIV_NON_REALTIME ^ MIDI_TUNING_ID ^ BULK_DUMP ^ prog, |acc, b| acc ^ b)
    };
    resp.push(checksum & 0x7F);
    debug_assert_eq!(resp.len(), len);

    Ok(SysexReply {
        handled: true,
        response: Some(resp),
    })
}

fn note_tune<C: TuningControl + ?Sized>(
    ctl: &mut C,
    data: &[u8],
    realtime: bool,
    dryrun: bool,
) -> SynthResult<SysexReply> {
    let with_bank = data[3] == NOTE_TUNE_BANK;
    let header = if with_bank { 7 } else { 6 };
    if data.len() < header + 4 || !is_data(&data[4..header]) {
        return Ok(SysexReply::default());
    }
    let count = data[header - 1] as usize;
    if data.len() != count * 4 + header {
        return Ok(SysexReply::default());
    }
    if dryrun {
        return Ok(SysexReply::handled());
    }

    let (bank, prog) = if with_bank { (data[4], data[5]) } else { (0, data[4]) };
    let mut keys = Vec::with_capacity(count);
    let mut pitches = Vec::with_capacity(count);
    for entry in data[header..].chunks_exact(4) {
        if !is_data(entry) {
            return Ok(SysexReply::default());
        }
        let note = entry[1];
        let frac = (entry[2] as u32) << 7 | entry[3] as u32;
        // 7F 7F 7F leaves the key unchanged
        if note == 0x7F && frac == 16383 {
            continue;
        }
        keys.push(entry[0]);
        pitches.push(note as f64 * 100.0 + frac as f64 * 100.0 / 16384.0);
    }

    if !keys.is_empty() {
        ctl.tune_notes(bank as u32, prog as u32, &keys, &pitches, realtime)?;
    }
    Ok(SysexReply::handled())
}

fn octave_tune<C: TuningControl + ?Sized>(
    ctl: &mut C,
    data: &[u8],
    realtime: bool,
    dryrun: bool,
) -> SynthResult<SysexReply> {
    let two_byte = data[3] == OCTAVE_TUNE_2BYTE;
    let expected = if two_byte { 31 } else { 19 };
    if data.len() != expected || !is_data(&data[4..]) {
        return Ok(SysexReply::default());
    }
    if dryrun {
        return Ok(SysexReply::handled());
    }

    let channels = (data[4] as u32 & 0x03) << 14 | (data[5] as u32) << 7 | data[6] as u32;
    let mut cents = [0.0; 12];
    if two_byte {
        for (c, pair) in cents.iter_mut().zip(data[7..].chunks_exact(2)) {
            let value = (pair[0] as i32) << 7 | pair[1] as i32;
            *c = (value - 8192) as f64 * (200.0 / 16384.0);
        }
    } else {
        for (c, &value) in cents.iter_mut().zip(&data[7..]) {
            *c = value as f64 - 64.0;
        }
    }

    ctl.activate_octave_tuning(0, 0, SYSEX_TUNING_NAME, &cents, realtime)?;
    for chan in (0..16).filter(|chan| channels & (1 << chan) != 0) {
        ctl.activate_tuning(chan, 0, 0, realtime)?;
    }
    Ok(SysexReply::handled())
}

/// Cents of every key in a dump reply, decoded the way a receiver would
pub fn decode_bulk_dump(resp: &[u8]) -> Option<(String, [f64; TUNING_KEYS])> {
    let offset = match resp.len() {
        BULK_DUMP_LEN => 5,
        BULK_DUMP_BANK_LEN => 6,
        _ => return None,
    };
    let name_bytes = &resp[offset..offset + NAME_LEN];
    let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    let name = String::from_utf8_lossy(&name_bytes[..end]).into_owned();

    let mut pitches = [0.0; TUNING_KEYS];
    let tuning_data = &resp[offset + NAME_LEN..offset + NAME_LEN + TUNING_KEYS * 3];
    for (p, entry) in pitches.iter_mut().zip(tuning_data.chunks_exact(3)) {
        let frac = (entry[1] as u32) << 7 | entry[2] as u32;
        *p = entry[0] as f64 * 100.0 + frac as f64 * 100.0 / 16384.0;
    }
    Some((name, pitches))
}
