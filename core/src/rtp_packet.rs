// core/src/rtp_packet.rs

use bytes::Bytes;

use crate::byte_order::{ByteReader, ByteWriter};
use crate::{ProtocolError, Result};

pub const RTP_VERSION: u8 = 2;
pub const RTP_HEADER_LEN: usize = 12;
/// Dynamic payload type conventionally used for RTP-MIDI.
pub const MIDI_PAYLOAD_TYPE: u8 = 97;
const MAX_CSRC: usize = 15;

/// RTP packet (RFC 3550 framing) as used by RTP-MIDI.
///
/// Padding and extension bits are carried verbatim; their content stays in
/// `payload` since RTP-MIDI peers never set them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub payload: Bytes,
}

impl RtpPacket {
    /// Outbound RTP-MIDI packet with the defaults this server always sends.
    pub fn new(ssrc: u32, sequence_number: u16, timestamp: u32, payload: Bytes) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            marker: true,
            payload_type: MIDI_PAYLOAD_TYPE,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            payload,
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < RTP_HEADER_LEN {
            return Err(ProtocolError::MalformedPacket(format!(
                "RTP packet too short: {} bytes",
                data.len()
            )));
        }
        let mut reader = ByteReader::new(data);
        let byte0 = reader.get_u8()?;
        let version = (byte0 >> 6) & 0x03;
        let padding = (byte0 >> 5) & 0x01 == 1;
        let extension = (byte0 >> 4) & 0x01 == 1;
        let csrc_count = (byte0 & 0x0F) as usize;

        let byte1 = reader.get_u8()?;
        let marker = (byte1 >> 7) & 0x01 == 1;
        let payload_type = byte1 & 0x7F;

        let sequence_number = reader.get_u16()?;
        let timestamp = reader.get_u32()?;
        let ssrc = reader.get_u32()?;

        let mut csrc = Vec::with_capacity(csrc_count);
        for _ in 0..csrc_count {
            let id = reader.get_u32().map_err(|_| {
                ProtocolError::MalformedPacket(format!("CSRC list truncated ({csrc_count} declared)"))
            })?;
            csrc.push(id);
        }

        Ok(Self {
            version,
            padding,
            extension,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            payload: Bytes::copy_from_slice(reader.rest()),
        })
    }

    pub fn encode(&self) -> Result<Bytes> {
        if self.csrc.len() > MAX_CSRC {
            return Err(ProtocolError::MalformedPacket(format!(
                "too many CSRC identifiers: {}",
                self.csrc.len()
            )));
        }
        let mut writer =
            ByteWriter::with_capacity(RTP_HEADER_LEN + 4 * self.csrc.len() + self.payload.len());
        let byte0 = ((self.version & 0x03) << 6)
            | ((self.padding as u8) << 5)
            | ((self.extension as u8) << 4)
            | self.csrc.len() as u8;
        writer.put_u8(byte0);
        writer.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        writer.put_u16(self.sequence_number);
        writer.put_u32(self.timestamp);
        writer.put_u32(self.ssrc);
        for id in &self.csrc {
            writer.put_u32(*id);
        }
        writer.put_slice(&self.payload);
        Ok(writer.freeze())
    }
}
