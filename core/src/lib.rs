pub mod byte_order;
pub mod config;
pub mod journal_engine;
pub mod midi_command;
pub mod midi_payload;
pub mod rtp_packet;
pub mod session_manager;

use std::fmt;

pub use crate::byte_order::{ByteReader, ByteWriter};
pub use crate::config::Config;
pub use crate::journal_engine::{Journal, JournalEvent};
pub use crate::midi_command::{
    map_command, MidiCommand, MidiControl, MidiMessageType, MidiNote,
};
pub use crate::midi_payload::{decode_payload, MidiCommands, MidiPayload, PayloadMode};
pub use crate::rtp_packet::RtpPacket;
pub use crate::session_manager::{Session, SessionState, SessionTable};

/// Chyba při zpracování protokolu.
///
/// Closed set of failure kinds shared by every codec and by the session
/// table. Nothing in the engine leaks raw OS error numbers past this type.
#[derive(Debug)]
pub enum ProtocolError {
    /// Structurally invalid datagram (bad signature, unknown command, short header).
    MalformedPacket(String),
    /// A read ran past the end of the buffer.
    TruncatedPayload { needed: usize, remaining: usize },
    /// Control command referenced an SSRC with no session.
    UnknownSession(u32),
    /// Session table or buffer limit reached.
    ResourceExhausted(String),
    /// Socket or sink I/O failure other than "would block".
    Transport(std::io::Error),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::MalformedPacket(s) => write!(f, "malformed packet: {s}"),
            ProtocolError::TruncatedPayload { needed, remaining } => write!(
                f,
                "truncated payload: needed {needed} bytes, {remaining} remaining"
            ),
            ProtocolError::UnknownSession(ssrc) => write!(f, "unknown session ssrc=0x{ssrc:08x}"),
            ProtocolError::ResourceExhausted(s) => write!(f, "resource exhausted: {s}"),
            ProtocolError::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Trait pro lokální MIDI výstup/vstup (HW zařízení, soubor, ...).
///
/// The engine only ever talks to the local side through this contract, so a
/// hardware port, a capture file or nothing at all can sit behind it.
pub trait LocalMidiSink: Send {
    /// Whether inbound MIDI should be written here at all.
    fn available(&self) -> bool;
    /// Write raw MIDI bytes (status + data). Best effort.
    fn write_raw(&mut self, bytes: &[u8]) -> Result<()>;
    /// Read pending raw MIDI bytes from the local input, `Ok(0)` when idle.
    fn read_raw(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }
}

impl<T: LocalMidiSink + ?Sized> LocalMidiSink for Box<T> {
    fn available(&self) -> bool {
        (**self).available()
    }
    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write_raw(bytes)
    }
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read_raw(buf)
    }
}

/// Returns true when `a` comes after `b` in RFC 1982 serial order (16 bit).
pub fn seq_newer(a: u16, b: u16) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000
}
