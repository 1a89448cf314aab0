// network/src/midi/rtp/control_message.rs

//! AppleMIDI session commands: `0xFFFF` signature, two-letter command code,
//! command-specific body. All integers are big-endian.

use bytes::Bytes;

use rtp_midi_core::{ByteReader, ByteWriter, ProtocolError, Result};

pub const SIGNATURE: u16 = 0xFFFF;
pub const PROTOCOL_VERSION: u32 = 2;

/// Shared body of IN / OK / NO / BY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHeader {
    pub protocol_version: u32,
    pub initiator_token: u32,
    pub ssrc: u32,
}

impl SessionHeader {
    pub fn new(initiator_token: u32, ssrc: u32) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            initiator_token,
            ssrc,
        }
    }

    fn serialize(&self, writer: &mut ByteWriter) {
        writer.put_u32(self.protocol_version);
        writer.put_u32(self.initiator_token);
        writer.put_u32(self.ssrc);
    }

    pub fn is_supported(&self) -> bool {
        self.protocol_version == PROTOCOL_VERSION
    }

    // Any version parses; the session layer decides what to do with it.
    fn parse(reader: &mut ByteReader<'_>) -> Result<Self> {
        let protocol_version = reader.get_u32()?;
        let initiator_token = reader.get_u32()?;
        let ssrc = reader.get_u32()?;
        Ok(Self {
            protocol_version,
            initiator_token,
            ssrc,
        })
    }
}

// Name runs up to the first NUL, or to the end if the peer left it out.
fn parse_name(reader: &ByteReader<'_>) -> String {
    let rest = reader.rest();
    let end = rest.iter().position(|b| *b == 0).unwrap_or(rest.len());
    String::from_utf8_lossy(&rest[..end]).into_owned()
}

fn put_name(writer: &mut ByteWriter, name: &str) {
    writer.put_slice(name.as_bytes());
    writer.put_u8(0);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub header: SessionHeader,
    pub name: String,
}

impl Invitation {
    pub fn new(initiator_token: u32, ssrc: u32, name: impl Into<String>) -> Self {
        Self {
            header: SessionHeader::new(initiator_token, ssrc),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationAccepted {
    pub header: SessionHeader,
    pub name: String,
}

impl InvitationAccepted {
    pub fn new(initiator_token: u32, ssrc: u32, name: impl Into<String>) -> Self {
        Self {
            header: SessionHeader::new(initiator_token, ssrc),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationRejected {
    pub header: SessionHeader,
}

impl InvitationRejected {
    pub fn new(initiator_token: u32, ssrc: u32) -> Self {
        Self {
            header: SessionHeader::new(initiator_token, ssrc),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exit {
    pub header: SessionHeader,
}

impl Exit {
    pub fn new(initiator_token: u32, ssrc: u32) -> Self {
        Self {
            header: SessionHeader::new(initiator_token, ssrc),
        }
    }
}

/// Clock synchronization (CK), three-way exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sync {
    pub ssrc: u32,
    pub count: u8,
    pub timestamps: [u64; 3],
}

impl Sync {
    pub fn new(ssrc: u32, count: u8, timestamps: [u64; 3]) -> Self {
        Self {
            ssrc,
            count,
            timestamps,
        }
    }
}

/// Receiver feedback (RS): highest sequence number the sender has seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverFeedback {
    pub ssrc: u32,
    pub sequence_number: u16,
}

impl ReceiverFeedback {
    pub fn new(ssrc: u32, sequence_number: u16) -> Self {
        Self {
            ssrc,
            sequence_number,
        }
    }
}

/// Bitrate receive limit (RL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitrateLimit {
    pub ssrc: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppleMidiMessage {
    Invitation(Invitation),
    InvitationAccepted(InvitationAccepted),
    InvitationRejected(InvitationRejected),
    Exit(Exit),
    Sync(Sync),
    ReceiverFeedback(ReceiverFeedback),
    BitrateLimit(BitrateLimit),
}

impl AppleMidiMessage {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        let signature = reader.get_u16()?;
        if signature != SIGNATURE {
            return Err(ProtocolError::MalformedPacket(format!(
                "bad AppleMIDI signature 0x{signature:04x}"
            )));
        }
        let code = reader.get_bytes(2)?;

        let message = match code {
            b"IN" => AppleMidiMessage::Invitation(Invitation {
                header: SessionHeader::parse(&mut reader)?,
                name: parse_name(&reader),
            }),
            b"OK" => AppleMidiMessage::InvitationAccepted(InvitationAccepted {
                header: SessionHeader::parse(&mut reader)?,
                name: parse_name(&reader),
            }),
            b"NO" => AppleMidiMessage::InvitationRejected(InvitationRejected {
                header: SessionHeader::parse(&mut reader)?,
            }),
            b"BY" => AppleMidiMessage::Exit(Exit {
                header: SessionHeader::parse(&mut reader)?,
            }),
            b"CK" => {
                let ssrc = reader.get_u32()?;
                let count = reader.get_u8()?;
                reader.skip(3)?;
                let timestamps = [reader.get_u64()?, reader.get_u64()?, reader.get_u64()?];
                AppleMidiMessage::Sync(Sync {
                    ssrc,
                    count,
                    timestamps,
                })
            }
            // Some peers omit the two padding bytes.
            b"RS" => AppleMidiMessage::ReceiverFeedback(ReceiverFeedback {
                ssrc: reader.get_u32()?,
                sequence_number: reader.get_u16()?,
            }),
            b"RL" => AppleMidiMessage::BitrateLimit(BitrateLimit {
                ssrc: reader.get_u32()?,
                limit: reader.get_u32()?,
            }),
            _ => {
                return Err(ProtocolError::MalformedPacket(format!(
                    "unknown AppleMIDI command 0x{:02x}{:02x}",
                    code[0], code[1]
                )))
            }
        };
        Ok(message)
    }

    pub fn serialize(&self) -> Bytes {
        let mut writer = ByteWriter::with_capacity(64);
        writer.put_u16(SIGNATURE);
        writer.put_slice(self.code());
        match self {
            AppleMidiMessage::Invitation(msg) => {
                msg.header.serialize(&mut writer);
                put_name(&mut writer, &msg.name);
            }
            AppleMidiMessage::InvitationAccepted(msg) => {
                msg.header.serialize(&mut writer);
                put_name(&mut writer, &msg.name);
            }
            AppleMidiMessage::InvitationRejected(msg) => msg.header.serialize(&mut writer),
            AppleMidiMessage::Exit(msg) => msg.header.serialize(&mut writer),
            AppleMidiMessage::Sync(msg) => {
                writer.put_u32(msg.ssrc);
                writer.put_u8(msg.count);
                writer.put_slice(&[0, 0, 0]);
                for ts in msg.timestamps {
                    writer.put_u64(ts);
                }
            }
            AppleMidiMessage::ReceiverFeedback(msg) => {
                writer.put_u32(msg.ssrc);
                writer.put_u16(msg.sequence_number);
                writer.put_u16(0);
            }
            AppleMidiMessage::BitrateLimit(msg) => {
                writer.put_u32(msg.ssrc);
                writer.put_u32(msg.limit);
            }
        }
        writer.freeze()
    }

    fn code(&self) -> &'static [u8; 2] {
        match self {
            AppleMidiMessage::Invitation(_) => b"IN",
            AppleMidiMessage::InvitationAccepted(_) => b"OK",
            AppleMidiMessage::InvitationRejected(_) => b"NO",
            AppleMidiMessage::Exit(_) => b"BY",
            AppleMidiMessage::Sync(_) => b"CK",
            AppleMidiMessage::ReceiverFeedback(_) => b"RS",
            AppleMidiMessage::BitrateLimit(_) => b"RL",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AppleMidiMessage::Invitation(_) => "INV",
            AppleMidiMessage::InvitationAccepted(_) => "ACCEPT",
            AppleMidiMessage::InvitationRejected(_) => "REJECT",
            AppleMidiMessage::Exit(_) => "END",
            AppleMidiMessage::Sync(_) => "SYNC",
            AppleMidiMessage::ReceiverFeedback(_) => "FEEDBACK",
            AppleMidiMessage::BitrateLimit(_) => "BITRATE",
        }
    }

    /// SSRC of the sender.
    pub fn ssrc(&self) -> u32 {
        match self {
            AppleMidiMessage::Invitation(msg) => msg.header.ssrc,
            AppleMidiMessage::InvitationAccepted(msg) => msg.header.ssrc,
            AppleMidiMessage::InvitationRejected(msg) => msg.header.ssrc,
            AppleMidiMessage::Exit(msg) => msg.header.ssrc,
            AppleMidiMessage::Sync(msg) => msg.ssrc,
            AppleMidiMessage::ReceiverFeedback(msg) => msg.ssrc,
            AppleMidiMessage::BitrateLimit(msg) => msg.ssrc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invitation_wire_layout() {
        let msg = AppleMidiMessage::Invitation(Invitation::new(0x0102_0304, 0xAABB_CCDD, "peer1"));
        let bytes = msg.serialize();
        assert_eq!(&bytes[..4], &[0xFF, 0xFF, 0x49, 0x4E]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 2]);
        assert_eq!(&bytes[8..12], &[1, 2, 3, 4]);
        assert_eq!(&bytes[12..16], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(&bytes[16..], b"peer1\0");
        assert_eq!(AppleMidiMessage::parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn name_without_terminator_is_accepted() {
        let mut data = vec![0xFF, 0xFF, b'O', b'K', 0, 0, 0, 2, 0, 0, 0, 9, 0, 0, 0, 7];
        data.extend_from_slice(b"mac");
        match AppleMidiMessage::parse(&data).unwrap() {
            AppleMidiMessage::InvitationAccepted(ok) => {
                assert_eq!(ok.name, "mac");
                assert_eq!(ok.header.initiator_token, 9);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sync_is_36_bytes() {
        let msg = AppleMidiMessage::Sync(Sync::new(7, 1, [10, 20, 0]));
        let bytes = msg.serialize();
        assert_eq!(bytes.len(), 36);
        assert_eq!(&bytes[2..4], b"CK");
        assert_eq!(bytes[8], 1);
        assert_eq!(AppleMidiMessage::parse(&bytes).unwrap(), msg);
        assert!(AppleMidiMessage::parse(&bytes[..35]).is_err());
    }

    #[test]
    fn feedback_with_and_without_padding() {
        let msg = AppleMidiMessage::ReceiverFeedback(ReceiverFeedback::new(0x11, 0x1234));
        let bytes = msg.serialize();
        assert_eq!(bytes.to_vec(), vec![0xFF, 0xFF, b'R', b'S', 0, 0, 0, 0x11, 0x12, 0x34, 0, 0]);
        assert_eq!(AppleMidiMessage::parse(&bytes[..10]).unwrap(), msg);
    }

    #[test]
    fn bitrate_and_end_parse() {
        let data = [0xFF, 0xFF, b'R', b'L', 0, 0, 0, 5, 0, 0, 0x10, 0];
        assert_eq!(
            AppleMidiMessage::parse(&data).unwrap(),
            AppleMidiMessage::BitrateLimit(BitrateLimit { ssrc: 5, limit: 4096 })
        );
        let end = AppleMidiMessage::Exit(Exit::new(3, 4));
        assert_eq!(end.name(), "END");
        assert_eq!(AppleMidiMessage::parse(&end.serialize()).unwrap().ssrc(), 4);
    }

    #[test]
    fn foreign_protocol_version_still_parses() {
        let data = [0xFF, 0xFF, b'I', b'N', 0, 0, 0, 1, 0, 0, 0, 9, 0, 0, 0, 7, b'x', 0];
        let AppleMidiMessage::Invitation(inv) = AppleMidiMessage::parse(&data).unwrap() else {
            panic!("expected IN");
        };
        assert_eq!(inv.header.protocol_version, 1);
        assert!(!inv.header.is_supported());
        assert_eq!(inv.header.initiator_token, 9);
    }

    #[test]
    fn garbage_is_malformed() {
        for data in [
            &[0xFF, 0xFF, b'Z', b'Z', 0, 0, 0, 0][..],
            &[0xFE, 0xFF, b'I', b'N'][..],
            &[0xFF, 0xFF, b'I', b'N', 0, 0, 0, 2, 0, 0, 0, 0][..],
            &[0xFF][..],
        ] {
            assert!(AppleMidiMessage::parse(data).is_err(), "{data:?}");
        }
    }
}
