// network/src/dispatch.rs

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, warn};

use rtp_midi_core::{
    decode_payload, map_command, Config, LocalMidiSink, MidiCommand, MidiControl, MidiMessageType,
    MidiNote, MidiPayload, PayloadMode, RtpPacket, Session, SessionTable,
};
use utils::{hex_dump, MediaClock};

use crate::midi::rtp::control_message::{AppleMidiMessage, ReceiverFeedback};
use crate::midi::rtp::session::{handle_control, ControlContext};

/// First byte of an AppleMIDI control command.
pub const CONTROL_PREFIX: u8 = 0xFF;
/// First byte of raw MIDI injected through the local port.
pub const LOCAL_PREFIX: u8 = 0xAA;

/// Logical socket a datagram arrived on (or must leave through).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketId {
    Control,
    Data,
    Local,
    /// Bytes read from the local MIDI sink's input side.
    Device,
}

/// A datagram the engine wants sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub socket: SocketId,
    pub destination: SocketAddr,
    pub payload: Bytes,
}

/// Protocol engine: session table, local sink and the media clock.
///
/// Purely synchronous. The reactor feeds it datagrams and sends whatever
/// it returns.
pub struct Engine {
    sessions: SessionTable,
    sink: Box<dyn LocalMidiSink>,
    clock: MediaClock,
    service_name: String,
    session_timeout: Duration,
}

impl Engine {
    pub fn new(config: &Config, sink: Box<dyn LocalMidiSink>) -> Self {
        Self {
            sessions: SessionTable::new(
                config.session.max_sessions,
                config.session.journal_capacity,
            ),
            sink,
            clock: MediaClock::new(),
            service_name: config.service_name.clone(),
            session_timeout: config.session_timeout(),
        }
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn sink_mut(&mut self) -> &mut dyn LocalMidiSink {
        &mut *self.sink
    }

    /// Classifies one datagram and returns the datagrams it produces.
    pub fn handle_datagram(
        &mut self,
        socket: SocketId,
        bytes: &[u8],
        source: SocketAddr,
    ) -> Vec<Outbound> {
        hex_dump(format_args!("{socket:?} datagram from {source}"), bytes);

        if socket == SocketId::Device {
            return self.handle_local_input(bytes);
        }
        match bytes.first() {
            None => Vec::new(),
            Some(&CONTROL_PREFIX) => self.handle_control_datagram(socket, bytes, source),
            Some(&LOCAL_PREFIX) => self.handle_local_input(&bytes[1..]),
            Some(_) => self.handle_remote_rtp(socket, bytes, source),
        }
    }

    fn handle_control_datagram(
        &mut self,
        socket: SocketId,
        bytes: &[u8],
        source: SocketAddr,
    ) -> Vec<Outbound> {
        let message = match AppleMidiMessage::parse(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping control datagram from {}: {}", source, e);
                return Vec::new();
            }
        };
        let mut ctx = ControlContext {
            sessions: &mut self.sessions,
            service_name: &self.service_name,
            clock: &self.clock,
        };
        handle_control(&mut ctx, message, socket, source)
            .map(|reply| Outbound {
                socket,
                destination: source,
                payload: reply.serialize(),
            })
            .into_iter()
            .collect()
    }

    /// Fans raw local MIDI out to every session, one RTP packet per command.
    pub fn handle_local_input(&mut self, bytes: &[u8]) -> Vec<Outbound> {
        let commands = decode_payload(bytes, PayloadMode::Stream);
        let mut outbound = Vec::with_capacity(commands.len() * self.sessions.len());
        let timestamp = self.clock.rtp_timestamp();

        for command in commands {
            debug!("Local MIDI: {} {:02x?}", map_command(&command).0, command.raw_bytes());
            for session in self.sessions.iter_mut() {
                match send_to_session(session, &command, timestamp) {
                    Ok(packet) => outbound.push(packet),
                    Err(e) => warn!(
                        "Failed to build RTP-MIDI packet for ssrc=0x{:08x}: {}",
                        session.ssrc, e
                    ),
                }
            }
        }
        outbound
    }

    fn handle_remote_rtp(
        &mut self,
        socket: SocketId,
        bytes: &[u8],
        source: SocketAddr,
    ) -> Vec<Outbound> {
        let packet = match RtpPacket::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping datagram from {}: {}", source, e);
                return Vec::new();
            }
        };
        match self.sessions.find_by_ssrc_mut(packet.ssrc) {
            Some(session) => session.touch(Instant::now()),
            None => debug!(
                "RTP-MIDI from {} with unknown ssrc=0x{:08x}, no session",
                source, packet.ssrc
            ),
        }

        let feedback = AppleMidiMessage::ReceiverFeedback(ReceiverFeedback::new(
            packet.ssrc,
            packet.sequence_number,
        ));
        let reply = Outbound {
            socket,
            destination: source,
            payload: feedback.serialize(),
        };

        let commands = decode_payload(&packet.payload, PayloadMode::Rtp);
        if self.sink.available() {
            for command in commands {
                if let Err(e) = self.sink.write_raw(&command.raw_bytes()) {
                    warn!("Local sink write failed: {}", e);
                }
            }
        } else {
            debug!(
                "{} MIDI command(s) from {} dropped, no local sink",
                commands.len(),
                source
            );
        }
        vec![reply]
    }

    /// Drops sessions idle longer than the configured timeout.
    pub fn expire_idle(&mut self, now: Instant) -> usize {
        self.sessions.expire_idle(now, self.session_timeout).len()
    }
}

// Journal goes in before the event itself is recorded, so the peer never
// gets a journal describing the packet it is attached to.
fn send_to_session(
    session: &mut Session,
    command: &MidiCommand,
    timestamp: u32,
) -> rtp_midi_core::Result<Outbound> {
    let mut payload = MidiPayload::from_command(command.clone());
    payload.set_journal(Some(session.journal.pack()));

    let sequence_number = session.increment_seq();
    let packet = RtpPacket::new(session.ssrc, sequence_number, timestamp, payload.encode()?);
    let bytes = packet.encode()?;

    match map_command(command).1 {
        MidiMessageType::NoteOn | MidiMessageType::NoteOff => {
            if let Some(note) = MidiNote::from_command(command) {
                session.journal.add_note(sequence_number, note);
            }
        }
        MidiMessageType::ControlChange => {
            if let Some(control) = MidiControl::from_command(command) {
                session.journal.add_control(sequence_number, control);
            }
        }
        MidiMessageType::Other => {}
    }

    Ok(Outbound {
        socket: SocketId::Data,
        destination: session.peer_address,
        payload: bytes,
    })
}
