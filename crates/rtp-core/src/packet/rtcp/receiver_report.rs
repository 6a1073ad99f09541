use bytes::{Buf, BytesMut};

use crate::error::Error;
use crate::packet::rtcp::sender_report::MAX_REPORT_BLOCKS;
use crate::packet::rtcp::{RtcpHeader, RtcpPacketType, RtcpReportBlock};
use crate::{Result, RtpSsrc};

/// RTCP receiver report (RFC 3550 Section 6.4.2)
///
/// An RR with no report blocks is the "empty report" a non-sending
/// participant leads its compound packets with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpReceiverReport {
    /// SSRC of the reporting participant
    pub ssrc: RtpSsrc,

    /// Reception reports about remote sources
    pub report_blocks: Vec<RtcpReportBlock>,
}

impl RtcpReceiverReport {
    /// Create an empty RR for `ssrc`
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self {
            ssrc,
            report_blocks: Vec::new(),
        }
    }

    /// Parse an RR body; `count` is the header's report block count
    pub fn parse(count: u8, body: &[u8]) -> Result<Self> {
        let required = 4 + count as usize * RtcpReportBlock::SIZE;
        if body.len() < required {
            return Err(Error::BufferTooSmall {
                required,
                available: body.len(),
            });
        }

        let mut buf = body;
        let ssrc = buf.get_u32();

        let mut report_blocks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            report_blocks.push(RtcpReportBlock::parse(&mut buf)?);
        }

        Ok(Self {
            ssrc,
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

        let body_len = 4 + self.report_blocks.len() * RtcpReportBlock::SIZE;
        RtcpHeader::new(
            RtcpPacketType::ReceiverReport,
            self.report_blocks.len() as u8,
            body_len,
        )
        .serialize(buf);

        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        for block in &self.report_blocks {
            block.serialize(buf);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_rr_roundtrip() {
        let rr = RtcpReceiverReport::new(0xCAFE_F00D);

        let mut buf = BytesMut::new();
        rr.serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), 8);

        let mut head = &buf[..4];
        let header = RtcpHeader::parse(&mut head).unwrap();
        assert_eq!(header.packet_type, RtcpPacketType::ReceiverReport);
        assert_eq!(header.count, 0);

        let parsed = RtcpReceiverReport::parse(header.count, &buf[4..]).unwrap();
        assert_eq!(parsed, rr);
    }

    #[test]
    fn test_rr_with_blocks_roundtrip() {
        let mut rr = RtcpReceiverReport::new(0x0101_0101);
        for i in 0..3u32 {
            let mut block = RtcpReportBlock::new(0x2000_0000 + i);
            block.jitter = i * 7;
            rr.report_blocks.push(block);
        }

        let mut buf = BytesMut::new();
        rr.serialize(&mut buf).unwrap();

        let mut head = &buf[..4];
        let header = RtcpHeader::parse(&mut head).unwrap();
        let parsed = RtcpReceiverReport::parse(header.count, &buf[4..]).unwrap();
        assert_eq!(parsed, rr);
    }

    #[test]
    fn test_parse_count_exceeds_body() {
        let data = [0u8; 8];
        assert!(matches!(
            RtcpReceiverReport::parse(2, &data),
            Err(Error::BufferTooSmall { .. })
        ));
    }
}
