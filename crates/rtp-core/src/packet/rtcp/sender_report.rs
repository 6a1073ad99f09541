use bytes::{Buf, BytesMut};

use crate::error::Error;
use crate::packet::rtcp::{NtpTimestamp, RtcpHeader, RtcpPacketType, RtcpReportBlock};
use crate::{Result, RtpSsrc, RtpTimestamp};

/// Sender info portion of an SR: 20 bytes after the SSRC
const SENDER_INFO_SIZE: usize = 20;

/// Maximum report blocks one SR/RR can carry (5-bit count field)
pub const MAX_REPORT_BLOCKS: usize = 31;

/// RTCP sender report (RFC 3550 Section 6.4.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpSenderReport {
    /// SSRC of the sender
    pub ssrc: RtpSsrc,

    /// Wallclock time this report was generated
    pub ntp_timestamp: NtpTimestamp,

    /// Media timestamp corresponding to the NTP timestamp
    pub rtp_timestamp: RtpTimestamp,

    /// Total RTP packets sent since the session started
    pub sender_packet_count: u32,

    /// Total payload octets sent since the session started
    pub sender_octet_count: u32,

    /// Reception reports about remote sources
    pub report_blocks: Vec<RtcpReportBlock>,
}

impl RtcpSenderReport {
    /// Create an empty SR for `ssrc`
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self {
            ssrc,
            ntp_timestamp: NtpTimestamp::default(),
            rtp_timestamp: 0,
            sender_packet_count: 0,
            sender_octet_count: 0,
            report_blocks: Vec::new(),
        }
    }

    /// Parse an SR body; `count` is the header's report block count
    pub fn parse(count: u8, body: &[u8]) -> Result<Self> {
        let required = 4 + SENDER_INFO_SIZE + count as usize * RtcpReportBlock::SIZE;
        if body.len() < required {
            return Err(Error::BufferTooSmall {
                required,
                available: body.len(),
            });
        }

        let mut buf = body;
        let ssrc = buf.get_u32();
        let ntp_timestamp = NtpTimestamp::from_u64(buf.get_u64());
        let rtp_timestamp = buf.get_u32();
        let sender_packet_count = buf.get_u32();
        let sender_octet_count = buf.get_u32();

        let mut report_blocks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            report_blocks.push(RtcpReportBlock::parse(&mut buf)?);
        }

        Ok(Self {
            ssrc,
            ntp_timestamp,
            rtp_timestamp,
            sender_packet_count,
            sender_octet_count,
            report_blocks,
        })
    }

    /// Serialize header and body
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        if self.report_blocks.len() > MAX_REPORT_BLOCKS {
            return Err(Error::InvalidConfig {
                details: format!("{} report blocks exceed the 31 limit", self.report_blocks.len()),
            });
        }

        let body_len = 4 + SENDER_INFO_SIZE + self.report_blocks.len() * RtcpReportBlock::SIZE;
        RtcpHeader::new(
            RtcpPacketType::SenderReport,
            self.report_blocks.len() as u8,
            body_len,
        )
        .serialize(buf);

        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        buf.extend_from_slice(&self.ntp_timestamp.to_u64().to_be_bytes());
        buf.extend_from_slice(&self.rtp_timestamp.to_be_bytes());
        buf.extend_from_slice(&self.sender_packet_count.to_be_bytes());
        buf.extend_from_slice(&self.sender_octet_count.to_be_bytes());

        for block in &self.report_blocks {
            block.serialize(buf);
        }

        Ok(())
    }
}
