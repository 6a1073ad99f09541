//! RTP packet encoding and decoding
//!
//! Bit-exact RFC 3550 Section 5.1 header layout. The first 32-bit word packs
//! version (2 bits, always 2), padding, extension, CSRC count (4 bits),
//! marker, payload type (7 bits) and the sequence number; the next two words
//! are the timestamp and SSRC, followed by the CSRC list and the optional
//! header extension.

pub mod rtcp;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::{Result, RtpCsrc, RtpSequenceNumber, RtpSsrc, RtpTimestamp};

/// RTP protocol version, the only one we accept
pub const RTP_VERSION: u8 = 2;

/// Minimum RTP header size in bytes (no CSRCs, no extension)
pub const RTP_MIN_HEADER_SIZE: usize = 12;

/// RTP header extension: profile identifier plus 32-bit payload words
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeaderExtension {
    /// Profile-defined identifier
    pub profile: u16,

    /// Extension payload, a whole number of 32-bit words
    pub data: Vec<u32>,
}

/// RTP packet header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// Padding flag: last payload byte holds the pad count
    pub padding: bool,

    /// Marker bit, profile-defined meaning
    pub marker: bool,

    /// Payload type (7 bits)
    pub payload_type: u8,

    /// Sequence number
    pub sequence_number: RtpSequenceNumber,

    /// Media timestamp
    pub timestamp: RtpTimestamp,

    /// Synchronization source
    pub ssrc: RtpSsrc,

    /// Contributing sources (up to 15)
    pub csrc: Vec<RtpCsrc>,

    /// Optional header extension
    pub extension: Option<RtpHeaderExtension>,
}

impl RtpHeader {
    /// Create a header with no CSRCs and no extension
    pub fn new(
        payload_type: u8,
        sequence_number: RtpSequenceNumber,
        timestamp: RtpTimestamp,
        ssrc: RtpSsrc,
    ) -> Self {
        Self {
            padding: false,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            extension: None,
        }
    }

    /// Size of the serialized header in bytes
    pub fn size(&self) -> usize {
        let mut size = RTP_MIN_HEADER_SIZE + self.csrc.len() * 4;
        if let Some(ext) = &self.extension {
            size += 4 + ext.data.len() * 4;
        }
        size
    }

    /// Serialize the header into `buf`
    pub fn serialize(&self, buf: &mut impl BufMut) -> Result<()> {
        let mut word0: u32 = (RTP_VERSION as u32) << 30;
        if self.padding {
            word0 |= 1 << 29;
        }
        if self.extension.is_some() {
            word0 |= 1 << 28;
        }
        word0 |= (self.csrc.len() as u32 & 0x0F) << 24;
        if self.marker {
            word0 |= 1 << 23;
        }
        word0 |= (self.payload_type as u32 & 0x7F) << 16;
        word0 |= self.sequence_number as u32;

        buf.put_u32(word0);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        for csrc in &self.csrc {
            buf.put_u32(*csrc);
        }

        if let Some(ext) = &self.extension {
            buf.put_u16(ext.profile);
            buf.put_u16(ext.data.len() as u16);
            for word in &ext.data {
                buf.put_u32(*word);
            }
        }

        Ok(())
    }

    /// Parse a header from the start of `data`, returning the header and the
    /// offset of the first payload byte.
    ///
    /// Rejects packets shorter than 12 bytes, a version other than 2, and an
    /// extension that claims more bytes than the packet holds.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < RTP_MIN_HEADER_SIZE {
            return Err(Error::PacketTooShort { size: data.len() });
        }

        let word0 = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let version = (word0 >> 30) as u8;
        if version != RTP_VERSION {
            return Err(Error::VersionMismatch { version });
        }

        let padding = (word0 >> 29) & 1 != 0;
        let has_extension = (word0 >> 28) & 1 != 0;
        let csrc_count = ((word0 >> 24) & 0x0F) as usize;
        let marker = (word0 >> 23) & 1 != 0;
        let payload_type = ((word0 >> 16) & 0x7F) as u8;
        let sequence_number = (word0 & 0xFFFF) as u16;

        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = RTP_MIN_HEADER_SIZE;
        if data.len() < offset + csrc_count * 4 {
            return Err(Error::PacketTooShort { size: data.len() });
        }
        let mut csrc = Vec::with_capacity(csrc_count);
        for _ in 0..csrc_count {
            csrc.push(u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]));
            offset += 4;
        }

        let extension = if has_extension {
            if data.len() < offset + 4 {
                return Err(Error::PacketTooShort { size: data.len() });
            }
            let profile = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let length = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4;
            let claimed = offset + length * 4;
            if claimed > data.len() {
                return Err(Error::ExtensionOverrun {
                    claimed,
                    packet_len: data.len(),
                });
            }
            let mut words = Vec::with_capacity(length);
            for _ in 0..length {
                words.push(u32::from_be_bytes([
                    data[offset],
                    data[offset + 1],
                    data[offset + 2],
                    data[offset + 3],
                ]));
                offset += 4;
            }
            Some(RtpHeaderExtension {
                profile,
                data: words,
            })
        } else {
            None
        };

        Ok((
            Self {
                padding,
                marker,
                payload_type,
                sequence_number,
                timestamp,
                ssrc,
                csrc,
                extension,
            },
            offset,
        ))
    }
}

/// Complete RTP packet: header plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// Packet header
    pub header: RtpHeader,

    /// Media payload (padding already stripped on parse)
    pub payload: Bytes,
}

impl RtpPacket {
    /// Create a new packet
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Total serialized size in bytes
    pub fn size(&self) -> usize {
        self.header.size() + self.payload.len()
    }

    /// Serialize header and payload into a fresh buffer
    pub fn serialize(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.size());
        self.header.serialize(&mut buf)?;
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Parse a packet, stripping trailing padding when the padding bit is set
    /// (last byte of the packet holds the pad count).
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (header, header_len) = RtpHeader::parse(data)?;

        let mut payload_end = data.len();
        if header.padding {
            let pad = data[data.len() - 1] as usize;
            if data.len() < header_len + pad {
                return Err(Error::PacketTooShort { size: data.len() });
            }
            payload_end -= pad;
        }

        Ok(Self {
            payload: Bytes::copy_from_slice(&data[header_len..payload_end]),
            header,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut header = RtpHeader::new(96, 4711, 0xDEADBEEF, 0x12345678);
        header.marker = true;
        header.csrc = vec![0x11111111, 0x22222222];

        let mut buf = BytesMut::new();
        header.serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), header.size());

        let (parsed, offset) = RtpHeader::parse(&buf).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(offset, header.size());
    }

    #[test]
    fn test_header_roundtrip_with_extension() {
        let mut header = RtpHeader::new(0, 1, 160, 0xABCD0001);
        header.extension = Some(RtpHeaderExtension {
            profile: 0xBEDE,
            data: vec![0x01020304, 0x05060708],
        });

        let mut buf = BytesMut::new();
        header.serialize(&mut buf).unwrap();

        let (parsed, offset) = RtpHeader::parse(&buf).unwrap();
        assert_eq!(parsed.extension, header.extension);
        assert_eq!(offset, 12 + 4 + 8);
    }

    #[test]
    fn test_parse_rejects_short_packet() {
        let data = [0x80u8; 11];
        assert!(matches!(
            RtpHeader::parse(&data),
            Err(Error::PacketTooShort { size: 11 })
        ));
    }

    #[test]
    fn test_parse_rejects_bad_version() {
        let mut data = [0u8; 12];
        data[0] = 0x40; // version 1
        assert!(matches!(
            RtpHeader::parse(&data),
            Err(Error::VersionMismatch { version: 1 })
        ));
    }

    #[test]
    fn test_parse_rejects_extension_overrun() {
        let mut header = RtpHeader::new(96, 1, 2, 3);
        header.extension = Some(RtpHeaderExtension {
            profile: 0,
            data: vec![0; 2],
        });
        let mut buf = BytesMut::new();
        header.serialize(&mut buf).unwrap();
        // Truncate into the extension words
        let truncated = &buf[..buf.len() - 4];
        assert!(matches!(
            RtpHeader::parse(truncated),
            Err(Error::ExtensionOverrun { .. })
        ));
    }

    #[test]
    fn test_packet_padding_stripped() {
        let mut header = RtpHeader::new(8, 100, 8000, 0xC0FFEE00);
        header.padding = true;
        let mut buf = BytesMut::new();
        header.serialize(&mut buf).unwrap();
        buf.put_slice(b"voice");
        // 3 bytes of padding, last byte is the count
        buf.put_slice(&[0, 0, 3]);

        let packet = RtpPacket::parse(&buf).unwrap();
        assert_eq!(&packet.payload[..], b"voice");
    }

    #[test]
    fn test_packet_roundtrip() {
        let header = RtpHeader::new(96, 555, 48000, 0x0BADF00D);
        let packet = RtpPacket::new(header, Bytes::from_static(b"payload"));
        let wire = packet.serialize().unwrap();
        let parsed = RtpPacket::parse(&wire).unwrap();
        assert_eq!(parsed, packet);
    }
}
