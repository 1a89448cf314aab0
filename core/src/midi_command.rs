// core/src/midi_command.rs

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::byte_order::{ByteReader, ByteWriter};
use crate::{ProtocolError, Result};

/// Largest value a 4-byte delta-time varint can carry.
pub const MAX_DELTA_TIME: u32 = 0x0FFF_FFFF;

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;

/// MIDI příkaz s časováním (delta_time).
///
/// `data` holds everything after the status byte. For SysEx that includes
/// the terminating 0xF7.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiCommand {
    pub delta_time: u32,
    pub status: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessageType {
    NoteOn,
    NoteOff,
    ControlChange,
    Other,
}

impl MidiCommand {
    pub fn new(status: u8, data: Vec<u8>) -> Self {
        Self {
            delta_time: 0,
            status,
            data,
        }
    }

    pub fn with_delta_time(mut self, delta_time: u32) -> Self {
        self.delta_time = delta_time;
        self
    }

    /// Status byte followed by data, exactly what a MIDI cable would carry.
    pub fn raw_bytes(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(1 + self.data.len());
        raw.push(self.status);
        raw.extend_from_slice(&self.data);
        raw
    }

    /// Writes delta-time, explicit status and data. No running-status compression.
    pub fn encode_into(&self, writer: &mut ByteWriter) {
        write_delta_time(writer, self.delta_time);
        writer.put_u8(self.status);
        writer.put_slice(&self.data);
    }

    pub fn encode(&self) -> Bytes {
        let mut writer = ByteWriter::with_capacity(8 + self.data.len());
        self.encode_into(&mut writer);
        writer.freeze()
    }
}

/// Encodes one command into its minimal wire form.
pub fn encode_command(command: &MidiCommand) -> Bytes {
    command.encode()
}

/// Number of data bytes implied by a status byte, `None` when variable (SysEx)
/// or when the byte is not a status byte at all.
pub fn data_length(status: u8) -> Option<usize> {
    match status & 0xF0 {
        0x80 | 0x90 | 0xA0 | 0xB0 | 0xE0 => Some(2),
        0xC0 | 0xD0 => Some(1),
        0xF0 => match status {
            SYSEX_START => None,
            0xF1 | 0xF3 => Some(1), // MTC Quarter Frame, Song Select
            0xF2 => Some(2),        // Song Position Pointer
            _ => Some(0),           // Tune Request, EOX, real-time, undefined
        },
        _ => None,
    }
}

/// System real-time bytes may appear anywhere in a stream, even mid-message.
pub fn is_realtime(status: u8) -> bool {
    status >= 0xF8
}

/// Classifies a command. A note-on with velocity 0 counts as a note-off.
pub fn map_command(command: &MidiCommand) -> (&'static str, MidiMessageType) {
    match command.status & 0xF0 {
        0x80 => ("Note Off", MidiMessageType::NoteOff),
        0x90 => {
            if command.data.get(1).copied().unwrap_or(0) == 0 {
                ("Note Off", MidiMessageType::NoteOff)
            } else {
                ("Note On", MidiMessageType::NoteOn)
            }
        }
        0xA0 => ("Polyphonic Key Pressure", MidiMessageType::Other),
        0xB0 => ("Control Change", MidiMessageType::ControlChange),
        0xC0 => ("Program Change", MidiMessageType::Other),
        0xD0 => ("Channel Pressure", MidiMessageType::Other),
        0xE0 => ("Pitch Bend Change", MidiMessageType::Other),
        _ => match command.status {
            SYSEX_START => ("System Exclusive", MidiMessageType::Other),
            0xF1 => ("MTC Quarter Frame", MidiMessageType::Other),
            0xF2 => ("Song Position Pointer", MidiMessageType::Other),
            0xF3 => ("Song Select", MidiMessageType::Other),
            0xF6 => ("Tune Request", MidiMessageType::Other),
            0xF8 => ("Timing Clock", MidiMessageType::Other),
            0xFA => ("Start", MidiMessageType::Other),
            0xFB => ("Continue", MidiMessageType::Other),
            0xFC => ("Stop", MidiMessageType::Other),
            0xFE => ("Active Sensing", MidiMessageType::Other),
            0xFF => ("Reset", MidiMessageType::Other),
            _ => ("Unknown", MidiMessageType::Other),
        },
    }
}

/// Note-on or note-off event as recorded in the recovery journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiNote {
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    pub on: bool,
}

impl MidiNote {
    pub fn from_command(command: &MidiCommand) -> Option<Self> {
        let (_, kind) = map_command(command);
        if !matches!(kind, MidiMessageType::NoteOn | MidiMessageType::NoteOff) {
            return None;
        }
        match command.data.as_slice() {
            [note, velocity] => Some(Self {
                channel: command.status & 0x0F,
                note: note & 0x7F,
                velocity: velocity & 0x7F,
                on: kind == MidiMessageType::NoteOn,
            }),
            _ => None,
        }
    }
}

/// Control-change event as recorded in the recovery journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiControl {
    pub channel: u8,
    pub controller: u8,
    pub value: u8,
}

impl MidiControl {
    pub fn from_command(command: &MidiCommand) -> Option<Self> {
        if command.status & 0xF0 != 0xB0 {
            return None;
        }
        match command.data.as_slice() {
            [controller, value] => Some(Self {
                channel: command.status & 0x0F,
                controller: controller & 0x7F,
                value: value & 0x7F,
            }),
            _ => None,
        }
    }
}

/// Reads a 7-bits-per-byte delta-time, at most 4 bytes long.
pub fn read_delta_time(reader: &mut ByteReader<'_>) -> Result<u32> {
    let mut value = 0u32;
    for _ in 0..4 {
        let byte = reader.get_u8()?;
        value = (value << 7) | (byte & 0x7F) as u32;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(ProtocolError::MalformedPacket(
        "delta-time exceeded 4 bytes".to_string(),
    ))
}

pub fn write_delta_time(writer: &mut ByteWriter, value: u32) {
    let value = value.min(MAX_DELTA_TIME);
    let mut started = false;
    for shift in [21u32, 14, 7] {
        let group = ((value >> shift) & 0x7F) as u8;
        if group != 0 || started {
            writer.put_u8(group | 0x80);
            started = true;
        }
    }
    writer.put_u8((value & 0x7F) as u8);
}
