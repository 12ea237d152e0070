//! MIDI message constants, decoding and priority classes
//!
//! A timeline `midi_message` object becomes a raw byte vector plus a
//! priority used to break ties between pins that share a timestamp. The
//! priority's high nibble ranks the action class (bank select before
//! program change before notes, transport sysex last); the channel
//! nibble is OR'd into the low nibble so equal actions keep a stable
//! per-channel order.

use serde_json::Value;

// Channel voice actions (high nibble of the status byte).
pub const ACTION_NOTE_OFF: u8 = 0x80;
pub const ACTION_NOTE_ON: u8 = 0x90;
pub const ACTION_KEY_PRESSURE: u8 = 0xA0;
pub const ACTION_CONTROL_CHANGE: u8 = 0xB0;
pub const ACTION_PROGRAM_CHANGE: u8 = 0xC0;
pub const ACTION_CHANNEL_PRESSURE: u8 = 0xD0;
pub const ACTION_PITCH_BEND: u8 = 0xE0;
pub const ACTION_SYSTEM: u8 = 0xF0;

// System messages (full status byte).
pub const SYSTEM_SYSEX_START: u8 = 0xF0;
pub const SYSTEM_SONG_POINTER: u8 = 0xF2;
pub const SYSTEM_SYSEX_END: u8 = 0xF7;
pub const SYSTEM_TIMING_CLOCK: u8 = 0xF8;
pub const SYSTEM_CLOCK_START: u8 = 0xFA;
pub const SYSTEM_CLOCK_CONTINUE: u8 = 0xFB;
pub const SYSTEM_CLOCK_STOP: u8 = 0xFC;

// MIDI Machine Control transport sysex.
pub const MMC_STOP: [u8; 6] = [0xF0, 0x7F, 0x7F, 0x06, 0x01, 0xF7];
pub const MMC_PLAY: [u8; 6] = [0xF0, 0x7F, 0x7F, 0x06, 0x02, 0xF7];
pub const MMC_REWIND: [u8; 6] = [0xF0, 0x7F, 0x7F, 0x06, 0x05, 0xF7];

// Priorities for pins the timeline builder injects itself.
pub const PRIORITY_CLOCK_PULSE: u8 = 0x30;
pub const PRIORITY_CLOCK_TAIL: u8 = 0xB0;
pub const PRIORITY_MMC_START: u8 = 0x00;
pub const PRIORITY_MMC_TAIL: u8 = 0xF0;

/// Why a `midi_message` object was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidMessage {
    /// A required field is absent or not an integer in 0..=255.
    BadField(&'static str),
    /// A data byte has bit 7 set.
    DataByteRange(&'static str, u8),
    /// The status byte names no known action.
    UnknownAction(u8),
    /// A sysex body shrank below one data byte after filtering.
    EmptySysex,
}

impl std::fmt::Display for InvalidMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadField(name) => write!(f, "missing or malformed field '{name}'"),
            Self::DataByteRange(name, value) => {
                write!(f, "data byte '{name}' = {value} exceeds 127")
            }
            Self::UnknownAction(status) => write!(f, "unknown action 0x{status:02X}"),
            Self::EmptySysex => write!(f, "sysex with no data bytes"),
        }
    }
}

/// Read a byte-sized integer field out of a `midi_message` object.
fn byte_field(message: &Value, name: &'static str) -> Result<u8, InvalidMessage> {
    message
        .get(name)
        .and_then(Value::as_u64)
        .and_then(|v| u8::try_from(v).ok())
        .ok_or(InvalidMessage::BadField(name))
}

/// Like `byte_field`, but rejects values with bit 7 set.
fn data_byte_field(message: &Value, name: &'static str) -> Result<u8, InvalidMessage> {
    let value = byte_field(message, name)?;
    if value & 0x80 != 0 {
        return Err(InvalidMessage::DataByteRange(name, value));
    }
    Ok(value)
}

/// Decode a `midi_message` JSON object into raw bytes plus a priority.
pub fn decode_midi_message(message: &Value) -> Result<(Vec<u8>, u8), InvalidMessage> {
    let status = byte_field(message, "status_byte")?;
    let channel = status & 0x0F;

    match status & 0xF0 {
        ACTION_SYSTEM => match status {
            SYSTEM_TIMING_CLOCK | SYSTEM_CLOCK_START | SYSTEM_CLOCK_STOP
            | SYSTEM_CLOCK_CONTINUE => Ok((vec![status], 0x30 | channel)),
            SYSTEM_SONG_POINTER => {
                let data_1 = data_byte_field(message, "data_byte_1")?;
                let data_2 = data_byte_field(message, "data_byte_2")?;
                Ok((vec![status, data_1, data_2], 0xB0 | channel))
            }
            SYSTEM_SYSEX_START => {
                let body = message
                    .get("data_bytes")
                    .and_then(Value::as_array)
                    .ok_or(InvalidMessage::BadField("data_bytes"))?;
                let mut bytes = vec![status];
                for item in body {
                    let value = item
                        .as_u64()
                        .and_then(|v| u8::try_from(v).ok())
                        .ok_or(InvalidMessage::BadField("data_bytes"))?;
                    // Interior start/end markers would truncate the
                    // stream on the receiver; skip them.
                    if value == SYSTEM_SYSEX_START || value == SYSTEM_SYSEX_END {
                        continue;
                    }
                    if value & 0x80 != 0 {
                        return Err(InvalidMessage::DataByteRange("data_bytes", value));
                    }
                    bytes.push(value);
                }
                if bytes.len() < 2 {
                    return Err(InvalidMessage::EmptySysex);
                }
                bytes.push(SYSTEM_SYSEX_END);
                Ok((bytes, 0xF0 | channel))
            }
            _ => Ok((vec![status], 0xD0 | channel)),
        },
        ACTION_NOTE_OFF | ACTION_NOTE_ON | ACTION_CONTROL_CHANGE | ACTION_PITCH_BEND
        | ACTION_KEY_PRESSURE => {
            let data_1 = data_byte_field(message, "data_byte_1")?;
            let data_2 = data_byte_field(message, "data_byte_2")?;
            let priority = match status & 0xF0 {
                ACTION_NOTE_OFF | ACTION_NOTE_ON => 0x50,
                ACTION_CONTROL_CHANGE => match data_1 {
                    // Bank select (MSB/LSB) must land before the
                    // program change it qualifies.
                    0 | 32 => 0x00,
                    // Modulation rides below note timing.
                    1 => 0x60,
                    // All-notes-off comes after the notes it silences.
                    123 => 0x90,
                    _ => 0x20,
                },
                ACTION_PITCH_BEND => 0x70,
                _ => 0x80,
            };
            Ok((vec![status, data_1, data_2], priority | channel))
        }
        ACTION_PROGRAM_CHANGE | ACTION_CHANNEL_PRESSURE => {
            let data = data_byte_field(message, "data_byte")?;
            let priority = if status & 0xF0 == ACTION_PROGRAM_CHANGE {
                0x10
            } else {
                0x80
            };
            Ok((vec![status, data], priority | channel))
        }
        _ => Err(InvalidMessage::UnknownAction(status)),
    }
}
