// core/src/midi_payload.rs

//! RTP-MIDI command section (RFC 6295 §3) and raw MIDI stream decoding.

use bytes::Bytes;
use log::debug;

use crate::byte_order::{ByteReader, ByteWriter};
use crate::midi_command::{
    data_length, is_realtime, read_delta_time, write_delta_time, MidiCommand, SYSEX_END,
    SYSEX_START,
};
use crate::{ProtocolError, Result};

const FLAG_B: u8 = 0b1000_0000;
const FLAG_J: u8 = 0b0100_0000;
const FLAG_Z: u8 = 0b0010_0000;
const FLAG_P: u8 = 0b0001_0000;
const SHORT_LEN_MAX: usize = 0x0F;
const LONG_LEN_MAX: usize = 0x0FFF;

/// Where the bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadMode {
    /// Raw MIDI from a local input: no header, no delta-times.
    Stream,
    /// RTP-MIDI payload: flags/length header, delta-times, optional journal.
    Rtp,
}

/// Decoded commands of one payload. Consumed once.
#[derive(Debug)]
pub struct MidiCommands {
    inner: std::vec::IntoIter<MidiCommand>,
}

impl Iterator for MidiCommands {
    type Item = MidiCommand;

    fn next(&mut self) -> Option<MidiCommand> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for MidiCommands {}

impl From<Vec<MidiCommand>> for MidiCommands {
    fn from(commands: Vec<MidiCommand>) -> Self {
        Self {
            inner: commands.into_iter(),
        }
    }
}

/// Decodes `buffer` into individual MIDI commands.
///
/// Truncated or malformed input ends decoding early; everything fully
/// decoded before that point is still returned.
pub fn decode_payload(buffer: &[u8], mode: PayloadMode) -> MidiCommands {
    match mode {
        PayloadMode::Stream => decode_stream(buffer).into(),
        PayloadMode::Rtp => match MidiPayload::decode(buffer) {
            Ok(payload) => payload.commands.into(),
            Err(e) => {
                debug!("decode_payload: {}", e);
                Vec::new().into()
            }
        },
    }
}

/// One RTP-MIDI payload: command section plus an optional journal chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiPayload {
    /// `Z`: the first command carries a delta-time.
    pub first_delta: bool,
    /// `P`: the first command's status was a phantom (running status across packets).
    pub phantom: bool,
    pub commands: Vec<MidiCommand>,
    /// Raw recovery journal bytes, present iff `J` is set on the wire.
    pub journal: Option<Bytes>,
}

impl MidiPayload {
    pub fn new(commands: Vec<MidiCommand>) -> Self {
        Self {
            first_delta: true,
            phantom: false,
            commands,
            journal: None,
        }
    }

    /// Wraps a single command the way the local-input path sends it.
    pub fn from_command(command: MidiCommand) -> Self {
        Self::new(vec![command])
    }

    /// Attach or clear the journal. An empty chunk counts as no journal.
    pub fn set_journal(&mut self, journal: Option<Bytes>) {
        self.journal = journal.filter(|j| !j.is_empty());
    }

    pub fn has_journal(&self) -> bool {
        self.journal.is_some()
    }

    pub fn decode(buffer: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(buffer);
        let flags = reader.get_u8()?;
        let mut declared = (flags & 0x0F) as usize;
        if flags & FLAG_B != 0 {
            declared = (declared << 8) | reader.get_u8()? as usize;
        }
        let first_delta = flags & FLAG_Z != 0;
        let phantom = flags & FLAG_P != 0;

        let available = reader.remaining();
        let section_len = declared.min(available);
        if declared > available {
            debug!(
                "MidiPayload::decode: declared length {} exceeds buffer ({} bytes)",
                declared, available
            );
        }
        let section = reader.get_bytes(section_len)?;
        let commands = decode_command_list(section, first_delta);

        let journal = if flags & FLAG_J != 0 && !reader.is_empty() {
            Some(Bytes::copy_from_slice(reader.rest()))
        } else {
            None
        };

        Ok(Self {
            first_delta,
            phantom,
            commands,
            journal,
        })
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut section = ByteWriter::with_capacity(16);
        for (index, command) in self.commands.iter().enumerate() {
            if index > 0 || self.first_delta {
                write_delta_time(&mut section, command.delta_time);
            }
            section.put_u8(command.status);
            section.put_slice(&command.data);
        }
        let len = section.len();

        let mut flags = 0u8;
        if self.journal.is_some() {
            flags |= FLAG_J;
        }
        if self.first_delta {
            flags |= FLAG_Z;
        }
        if self.phantom {
            flags |= FLAG_P;
        }

        let journal_len = self.journal.as_ref().map_or(0, |j| j.len());
        let mut writer = ByteWriter::with_capacity(2 + len + journal_len);
        if len <= SHORT_LEN_MAX {
            writer.put_u8(flags | len as u8);
        } else if len <= LONG_LEN_MAX {
            writer.put_u8(flags | FLAG_B | (len >> 8) as u8);
            writer.put_u8((len & 0xFF) as u8);
        } else {
            return Err(ProtocolError::ResourceExhausted(format!(
                "MIDI command section too long ({len} bytes, max {LONG_LEN_MAX})"
            )));
        }
        writer.put_slice(&section.freeze());
        if let Some(journal) = &self.journal {
            writer.put_slice(journal);
        }
        Ok(writer.freeze())
    }
}

/// Raw MIDI as a cable carries it. Real-time bytes are pulled out wherever
/// they sit, orphan data bytes are skipped, an unfinished trailing message
/// is dropped.
fn decode_stream(buffer: &[u8]) -> Vec<MidiCommand> {
    let mut commands = Vec::new();
    let mut running_status: Option<u8> = None;
    let mut pending: Option<MidiCommand> = None;

    for &byte in buffer {
        if is_realtime(byte) {
            commands.push(MidiCommand::new(byte, Vec::new()));
            continue;
        }

        if byte & 0x80 != 0 {
            if byte == SYSEX_END {
                if let Some(mut sysex) = pending.take().filter(|p| p.status == SYSEX_START) {
                    sysex.data.push(byte);
                    commands.push(sysex);
                } else {
                    debug!("decode_stream: stray EOX");
                }
                running_status = None;
                continue;
            }
            if let Some(dropped) = pending.take() {
                debug!("decode_stream: 0x{:02X} interrupted by 0x{:02X}", dropped.status, byte);
            }
            // Channel messages set running status, system common clears it.
            running_status = (byte < 0xF0).then_some(byte);
            let command = MidiCommand::new(byte, Vec::new());
            if data_length(byte) == Some(0) {
                commands.push(command);
            } else {
                pending = Some(command);
            }
            continue;
        }

        let mut command = match pending.take() {
            Some(command) => command,
            None => match running_status {
                Some(status) => MidiCommand::new(status, Vec::new()),
                None => {
                    debug!("decode_stream: skipping data byte 0x{:02X} without status", byte);
                    continue;
                }
            },
        };
        command.data.push(byte);
        match data_length(command.status) {
            Some(len) if command.data.len() == len => commands.push(command),
            _ => pending = Some(command),
        }
    }

    if let Some(partial) = pending {
        debug!("decode_stream: dropping unfinished 0x{:02X}", partial.status);
    }
    commands
}

fn decode_command_list(section: &[u8], first_delta: bool) -> Vec<MidiCommand> {
    let mut reader = ByteReader::new(section);
    let mut running_status: Option<u8> = None;
    let mut commands = Vec::new();

    while !reader.is_empty() {
        let has_delta = !commands.is_empty() || first_delta;
        let mut attempt = reader.clone();
        match read_command(&mut attempt, has_delta, &mut running_status) {
            Ok(command) => {
                commands.push(command);
                reader = attempt;
            }
            Err(e) => {
                debug!(
                    "decode_command_list: stopping after {} commands: {}",
                    commands.len(),
                    e
                );
                break;
            }
        }
    }
    commands
}

fn read_command(
    reader: &mut ByteReader<'_>,
    has_delta: bool,
    running_status: &mut Option<u8>,
) -> Result<MidiCommand> {
    let delta_time = if has_delta { read_delta_time(reader)? } else { 0 };

    let status = if reader.peek_u8()? & 0x80 != 0 {
        reader.get_u8()?
    } else {
        running_status.ok_or_else(|| {
            ProtocolError::MalformedPacket("data byte without running status".to_string())
        })?
    };

    let data = match data_length(status) {
        Some(len) => {
            let data = reader.get_bytes(len)?;
            if data.iter().any(|b| b & 0x80 != 0) {
                return Err(ProtocolError::MalformedPacket(format!(
                    "status byte inside data of 0x{status:02X}"
                )));
            }
            data.to_vec()
        }
        None => {
            let rest = reader.rest();
            let end = rest.iter().position(|&b| b == SYSEX_END).ok_or(
                ProtocolError::TruncatedPayload {
                    needed: rest.len() + 1,
                    remaining: rest.len(),
                },
            )?;
            reader.get_bytes(end + 1)?.to_vec()
        }
    };

    // Channel messages set running status, system common clears it,
    // real-time leaves it alone.
    if status < 0xF0 {
        *running_status = Some(status);
    } else if status < 0xF8 {
        *running_status = None;
    }

    Ok(MidiCommand {
        delta_time,
        status,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_mode_expands_running_status() {
        let raw = [0x90, 60, 100, 62, 90, 0xB1, 7, 127];
        let commands: Vec<_> = decode_payload(&raw, PayloadMode::Stream).collect();
        assert_eq!(
            commands,
            vec![
                MidiCommand::new(0x90, vec![60, 100]),
                MidiCommand::new(0x90, vec![62, 90]),
                MidiCommand::new(0xB1, vec![7, 127]),
            ]
        );
    }

    #[test]
    fn realtime_does_not_break_running_status() {
        let raw = [0x90, 60, 100, 0xF8, 61, 100];
        let commands: Vec<_> = decode_payload(&raw, PayloadMode::Stream).collect();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[1].status, 0xF8);
        assert_eq!(commands[2], MidiCommand::new(0x90, vec![61, 100]));
    }

    #[test]
    fn realtime_inside_note_on_is_pulled_out() {
        let raw = [0x90, 60, 0xF8, 100, 0x80, 60, 0];
        let commands: Vec<_> = decode_payload(&raw, PayloadMode::Stream).collect();
        assert_eq!(
            commands,
            vec![
                MidiCommand::new(0xF8, vec![]),
                MidiCommand::new(0x90, vec![60, 100]),
                MidiCommand::new(0x80, vec![60, 0]),
            ]
        );
    }

    #[test]
    fn orphan_data_bytes_are_skipped() {
        let raw = [60, 100, 0x90, 61, 100, 0xF3, 5, 7, 0xB0, 64, 127];
        let commands: Vec<_> = decode_payload(&raw, PayloadMode::Stream).collect();
        assert_eq!(
            commands,
            vec![
                MidiCommand::new(0x90, vec![61, 100]),
                MidiCommand::new(0xF3, vec![5]),
                MidiCommand::new(0xB0, vec![64, 127]),
            ]
        );
    }

    #[test]
    fn status_byte_abandons_unfinished_message() {
        let raw = [0x90, 60, 0x80, 60, 0];
        let commands: Vec<_> = decode_payload(&raw, PayloadMode::Stream).collect();
        assert_eq!(commands, vec![MidiCommand::new(0x80, vec![60, 0])]);
    }

    #[test]
    fn system_common_cancels_running_status() {
        let raw = [0x90, 60, 100, 0xF6, 61, 100];
        let commands: Vec<_> = decode_payload(&raw, PayloadMode::Stream).collect();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].status, 0xF6);
    }

    #[test]
    fn sysex_runs_to_terminator() {
        let raw = [0xF0, 0x7E, 0x01, 0xF7, 0x80, 60, 0];
        let commands: Vec<_> = decode_payload(&raw, PayloadMode::Stream).collect();
        assert_eq!(commands[0].data, vec![0x7E, 0x01, 0xF7]);
        assert_eq!(commands[1].status, 0x80);
    }

    #[test]
    fn rtp_payload_with_running_status_and_deltas() {
        // Z clear: first command has no delta-time.
        let payload = [0x07, 0x90, 60, 100, 0x05, 62, 90, 0x00];
        let decoded = MidiPayload::decode(&payload).unwrap();
        assert!(!decoded.first_delta);
        assert_eq!(
            decoded.commands,
            vec![
                MidiCommand::new(0x90, vec![60, 100]),
                MidiCommand::new(0x90, vec![62, 90]).with_delta_time(5),
            ]
        );
        assert!(decoded.journal.is_none());
    }

    #[test]
    fn declared_length_longer_than_buffer_keeps_complete_commands() {
        // Declares 15 bytes, carries one whole command and half of another.
        let payload = [0x2F, 0x00, 0x90, 60, 100, 0x00, 0xB0, 7];
        let commands: Vec<_> = decode_payload(&payload, PayloadMode::Rtp).collect();
        assert_eq!(commands, vec![MidiCommand::new(0x90, vec![60, 100])]);
    }

    #[test]
    fn truncated_stream_drops_partial_command() {
        let raw = [0x90, 60, 100, 0xC0];
        let commands: Vec<_> = decode_payload(&raw, PayloadMode::Stream).collect();
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn empty_rtp_buffer_yields_nothing() {
        assert_eq!(decode_payload(&[], PayloadMode::Rtp).len(), 0);
    }

    #[test]
    fn encode_sets_journal_flag_per_instance() {
        let mut payload = MidiPayload::from_command(MidiCommand::new(0x90, vec![60, 100]));
        let plain = payload.encode().unwrap();
        assert_eq!(plain[0], FLAG_Z | 4);

        payload.set_journal(Some(Bytes::from_static(&[0xAA, 0xBB])));
        let journaled = payload.encode().unwrap();
        assert_eq!(journaled[0], FLAG_J | FLAG_Z | 4);
        assert_eq!(&journaled[5..], &[0xAA, 0xBB]);

        payload.set_journal(Some(Bytes::new()));
        assert!(!payload.has_journal());
        assert_eq!(payload.encode().unwrap(), plain);
    }

    #[test]
    fn long_sections_use_two_byte_header() {
        let commands = (0..8)
            .map(|i| MidiCommand::new(0x90, vec![i, 100]))
            .collect::<Vec<_>>();
        let payload = MidiPayload::new(commands.clone());
        let bytes = payload.encode().unwrap();
        assert_eq!(bytes[0] & FLAG_B, FLAG_B);
        let len = (((bytes[0] & 0x0F) as usize) << 8) | bytes[1] as usize;
        assert_eq!(len, 8 * 4);
        assert_eq!(MidiPayload::decode(&bytes).unwrap().commands, commands);
    }

    #[test]
    fn single_commands_round_trip() {
        let cases = vec![
            MidiCommand::new(0x90, vec![60, 127]),
            MidiCommand::new(0x85, vec![61, 0]).with_delta_time(300),
            MidiCommand::new(0xBF, vec![64, 127]),
            MidiCommand::new(0xC3, vec![12]),
            MidiCommand::new(0xF8, vec![]).with_delta_time(1),
        ];
        for command in cases {
            let bytes = MidiPayload::from_command(command.clone()).encode().unwrap();
            let decoded: Vec<_> = decode_payload(&bytes, PayloadMode::Rtp).collect();
            assert_eq!(decoded, vec![command]);
        }
    }

    #[test]
    fn journal_bytes_survive_decode() {
        let mut payload = MidiPayload::from_command(MidiCommand::new(0x90, vec![1, 2]));
        payload.set_journal(Some(Bytes::from_static(&[0x20, 0x00, 0x01])));
        let decoded = MidiPayload::decode(&payload.encode().unwrap()).unwrap();
        assert_eq!(decoded, payload);
    }
}
