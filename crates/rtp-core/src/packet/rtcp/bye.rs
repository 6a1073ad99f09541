use bytes::{Buf, BytesMut};

use crate::error::Error;
use crate::packet::rtcp::{RtcpHeader, RtcpPacketType};
use crate::{Result, RtpSsrc};

/// Longest BYE reason we will build or accept
pub const MAX_BYE_REASON: usize = 255;

/// RTCP Goodbye packet (RFC 3550 Section 6.6)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RtcpGoodbye {
    /// SSRCs leaving the session
    pub sources: Vec<RtpSsrc>,

    /// Optional reason for leaving, length-prefixed on the wire
    pub reason: Option<String>,
}

impl RtcpGoodbye {
    /// BYE for a single source
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self {
            sources: vec![ssrc],
            reason: None,
        }
    }

    /// BYE for a single source with a reason
    pub fn with_reason(ssrc: RtpSsrc, reason: impl Into<String>) -> Self {
        Self {
            sources: vec![ssrc],
            reason: Some(reason.into()),
        }
    }

    /// Parse a BYE body; `count` is the header's source count
    pub fn parse(count: u8, body: &[u8]) -> Result<Self> {
        let required = count as usize * 4;
        if body.len() < required {
            return Err(Error::BufferTooSmall {
                required,
                available: body.len(),
            });
        }

        let mut buf = body;
        let mut sources = Vec::with_capacity(count as usize);
        for _ in 0..count {
            sources.push(buf.get_u32());
        }

        // Anything left is the length-prefixed reason plus padding
        let reason = if buf.remaining() > 0 {
            let len = buf.get_u8() as usize;
            if len > buf.remaining() {
                return Err(Error::IllegalPacket("BYE reason overruns packet"));
            }
            let text = String::from_utf8_lossy(&buf[..len]).into_owned();
            Some(text)
        } else {
            None
        };

        Ok(Self { sources, reason })
    }

    /// Serialize header and body, padding the reason to a word boundary
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        if self.sources.is_empty() || self.sources.len() > 31 {
            return Err(Error::InvalidConfig {
                details: format!("BYE must list 1..=31 sources, got {}", self.sources.len()),
            });
        }
        if let Some(reason) = &self.reason {
            if reason.len() > MAX_BYE_REASON {
                return Err(Error::InvalidConfig {
                    details: format!("BYE reason of {} bytes exceeds 255", reason.len()),
                });
            }
        }

        let mut body_len = self.sources.len() * 4;
        if let Some(reason) = &self.reason {
            // Length byte plus text, rounded up to a whole word
            body_len += (1 + reason.len() + 3) & !3;
        }

        RtcpHeader::new(RtcpPacketType::Goodbye, self.sources.len() as u8, body_len)
            .serialize(buf);

        for ssrc in &self.sources {
            buf.extend_from_slice(&ssrc.to_be_bytes());
        }

        if let Some(reason) = &self.reason {
            buf.extend_from_slice(&[reason.len() as u8]);
            buf.extend_from_slice(reason.as_bytes());
            let pad = (4 - (1 + reason.len()) % 4) % 4;
            buf.extend_from_slice(&[0u8; 3][..pad]);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bye_roundtrip_no_reason() {
        let bye = RtcpGoodbye::new(0x1234_5678);

        let mut buf = BytesMut::new();
        bye.serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), 8);

        let mut head = &buf[..4];
        let header = RtcpHeader::parse(&mut head).unwrap();
        assert_eq!(header.packet_type, RtcpPacketType::Goodbye);
        assert_eq!(header.count, 1);

        let parsed = RtcpGoodbye::parse(header.count, &buf[4..]).unwrap();
        assert_eq!(parsed, bye);
    }

    #[test]
    fn test_bye_roundtrip_with_reason() {
        let bye = RtcpGoodbye::with_reason(0xDEAD_BEEF, "collision");

        let mut buf = BytesMut::new();
        bye.serialize(&mut buf).unwrap();
        // body must be word-aligned
        assert_eq!(buf.len() % 4, 0);

        let mut head = &buf[..4];
        let header = RtcpHeader::parse(&mut head).unwrap();
        let parsed = RtcpGoodbye::parse(header.count, &buf[4..]).unwrap();
        assert_eq!(parsed.sources, vec![0xDEAD_BEEF]);
        assert_eq!(parsed.reason.as_deref(), Some("collision"));
    }

    #[test]
    fn test_bye_reason_overrun_rejected() {
        // One source, then a reason length claiming more than remains
        let body = [0, 0, 0, 1, 10, b'x', b'y', 0];
        assert!(matches!(
            RtcpGoodbye::parse(1, &body),
            Err(Error::IllegalPacket(_))
        ));
    }

    #[test]
    fn test_bye_without_sources_rejected() {
        let bye = RtcpGoodbye::default();
        let mut buf = BytesMut::new();
        assert!(matches!(
            bye.serialize(&mut buf),
            Err(Error::InvalidConfig { .. })
        ));
    }
}
