//! RTCP packet types and the compound packet codec (RFC 3550 Section 6)
//!
//! Every RTCP packet starts with the common 4-byte header; a compound packet
//! is a sequence of them in one UDP datagram. [`RtcpCompoundReader`] walks a
//! compound buffer packet by packet, so callers can apply each sub-packet's
//! side effects as it parses; a malformed sub-packet stops the walk without
//! undoing what earlier sub-packets already did.

pub mod app;
pub mod bye;
pub mod ntp;
pub mod receiver_report;
pub mod report_block;
pub mod sdes;
pub mod sender_report;

pub use app::RtcpApp;
pub use bye::RtcpGoodbye;
pub use ntp::NtpTimestamp;
pub use receiver_report::RtcpReceiverReport;
pub use report_block::RtcpReportBlock;
pub use sdes::{RtcpSdes, SdesChunk, SdesItem, SdesItemType};
pub use sender_report::RtcpSenderReport;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::Error;
use crate::{Result, MAX_RTCP_PACKET_BODY};

/// RTCP protocol version
pub const RTCP_VERSION: u8 = 2;

/// RTCP packet type codes (RFC 3550 Section 12.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcpPacketType {
    /// SR: sender report (200)
    SenderReport,
    /// RR: receiver report (201)
    ReceiverReport,
    /// SDES: source description (202)
    SourceDescription,
    /// BYE: leaving the session (203)
    Goodbye,
    /// APP: application-defined (204)
    ApplicationDefined,
}

impl RtcpPacketType {
    /// Map a wire byte to a packet type; only 200..=204 are legal
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            200 => Some(Self::SenderReport),
            201 => Some(Self::ReceiverReport),
            202 => Some(Self::SourceDescription),
            203 => Some(Self::Goodbye),
            204 => Some(Self::ApplicationDefined),
            _ => None,
        }
    }

    /// Wire byte for this type
    pub fn to_u8(self) -> u8 {
        match self {
            Self::SenderReport => 200,
            Self::ReceiverReport => 201,
            Self::SourceDescription => 202,
            Self::Goodbye => 203,
            Self::ApplicationDefined => 204,
        }
    }
}

/// Common RTCP packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpHeader {
    /// Padding bit
    pub padding: bool,

    /// Count field: report blocks, SDES chunks, BYE sources, or APP subtype
    pub count: u8,

    /// Packet type
    pub packet_type: RtcpPacketType,

    /// Packet length in 32-bit words minus one, excluding nothing
    pub length: u16,
}

impl RtcpHeader {
    /// Wire size of the header
    pub const SIZE: usize = 4;

    /// Create a header; `body_len` is the byte length of everything after the
    /// header and must be a multiple of 4.
    pub fn new(packet_type: RtcpPacketType, count: u8, body_len: usize) -> Self {
        Self {
            padding: false,
            count,
            packet_type,
            length: (body_len / 4) as u16,
        }
    }

    /// Byte length of the packet body this header declares
    pub fn body_len(&self) -> usize {
        self.length as usize * 4
    }

    /// Serialize the header
    pub fn serialize(&self, buf: &mut impl BufMut) {
        let mut byte0 = RTCP_VERSION << 6;
        if self.padding {
            byte0 |= 1 << 5;
        }
        byte0 |= self.count & 0x1F;
        buf.put_u8(byte0);
        buf.put_u8(self.packet_type.to_u8());
        buf.put_u16(self.length);
    }

    /// Parse a header, rejecting bad versions and unknown packet types
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(Error::BufferTooSmall {
                required: Self::SIZE,
                available: buf.remaining(),
            });
        }

        let byte0 = buf.get_u8();
        let version = byte0 >> 6;
        if version != RTCP_VERSION {
            return Err(Error::VersionMismatch { version });
        }

        let type_byte = buf.get_u8();
        let packet_type = RtcpPacketType::from_u8(type_byte)
            .ok_or(Error::IllegalPacket("packet type outside 200..=204"))?;

        Ok(Self {
            padding: byte0 & 0x20 != 0,
            count: byte0 & 0x1F,
            packet_type,
            length: buf.get_u16(),
        })
    }
}

/// A parsed RTCP packet of any of the five RFC 3550 types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(RtcpSenderReport),
    ReceiverReport(RtcpReceiverReport),
    SourceDescription(RtcpSdes),
    Goodbye(RtcpGoodbye),
    App(RtcpApp),
}

impl RtcpPacket {
    /// Type code of this packet
    pub fn packet_type(&self) -> RtcpPacketType {
        match self {
            Self::SenderReport(_) => RtcpPacketType::SenderReport,
            Self::ReceiverReport(_) => RtcpPacketType::ReceiverReport,
            Self::SourceDescription(_) => RtcpPacketType::SourceDescription,
            Self::Goodbye(_) => RtcpPacketType::Goodbye,
            Self::App(_) => RtcpPacketType::ApplicationDefined,
        }
    }

    /// Parse a packet body given its already-parsed header
    pub fn parse_body(header: &RtcpHeader, body: &[u8]) -> Result<Self> {
        match header.packet_type {
            RtcpPacketType::SenderReport => {
                Ok(Self::SenderReport(RtcpSenderReport::parse(header.count, body)?))
            }
            RtcpPacketType::ReceiverReport => {
                Ok(Self::ReceiverReport(RtcpReceiverReport::parse(header.count, body)?))
            }
            RtcpPacketType::SourceDescription => {
                Ok(Self::SourceDescription(RtcpSdes::parse(header.count, body)?))
            }
            RtcpPacketType::Goodbye => Ok(Self::Goodbye(RtcpGoodbye::parse(header.count, body)?)),
            RtcpPacketType::ApplicationDefined => {
                Ok(Self::App(RtcpApp::parse(header.count, body)?))
            }
        }
    }

    /// Serialize header and body into `buf`
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            Self::SenderReport(sr) => sr.serialize(buf),
            Self::ReceiverReport(rr) => rr.serialize(buf),
            Self::SourceDescription(sdes) => sdes.serialize(buf),
            Self::Goodbye(bye) => bye.serialize(buf),
            Self::App(app) => app.serialize(buf),
        }
    }
}

/// Streaming parser over an RTCP compound buffer.
///
/// Yields one [`RtcpPacket`] at a time so the caller can act on each before
/// the next is validated. The first error ends the stream; sub-packets parsed
/// before it remain processed.
pub struct RtcpCompoundReader<'a> {
    data: &'a [u8],
    offset: usize,
    end: usize,
    failed: bool,
}

impl<'a> RtcpCompoundReader<'a> {
    /// Wrap a received compound buffer
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            end: data.len(),
            failed: false,
        }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.end.saturating_sub(self.offset)
    }

    /// Parse the next sub-packet, or `None` at a clean end of buffer
    pub fn next_packet(&mut self) -> Option<Result<RtcpPacket>> {
        if self.failed || self.offset >= self.end {
            return None;
        }

        match self.parse_one() {
            Ok(packet) => Some(Ok(packet)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    fn parse_one(&mut self) -> Result<RtcpPacket> {
        if self.end - self.offset < RtcpHeader::SIZE {
            return Err(Error::IllegalPacket("truncated packet header"));
        }

        let mut head = &self.data[self.offset..self.offset + RtcpHeader::SIZE];
        let header = RtcpHeader::parse(&mut head)?;

        let body_len = header.body_len();
        if body_len > MAX_RTCP_PACKET_BODY {
            return Err(Error::IllegalPacket("declared length over limit"));
        }
        if self.offset + RtcpHeader::SIZE + body_len > self.end {
            return Err(Error::IllegalPacket("declared length overruns buffer"));
        }

        let mut body_end = self.offset + RtcpHeader::SIZE + body_len;

        // The padding count lives in the last byte of the whole datagram
        if header.padding {
            let pad = self.data[self.data.len() - 1] as usize;
            if pad == 0 || pad > body_len {
                return Err(Error::IllegalPacket("bad padding count"));
            }
            body_end -= pad;
            self.end = self.end.min(self.data.len() - pad);
        }

        let body = &self.data[self.offset + RtcpHeader::SIZE..body_end];
        let packet = RtcpPacket::parse_body(&header, body)?;
        self.offset += RtcpHeader::SIZE + body_len;
        Ok(packet)
    }
}
