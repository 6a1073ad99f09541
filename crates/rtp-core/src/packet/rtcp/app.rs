use bytes::{Buf, Bytes, BytesMut};

use crate::error::Error;
use crate::packet::rtcp::{RtcpHeader, RtcpPacketType};
use crate::{Result, RtpSsrc};

/// RTCP application-defined packet (RFC 3550 Section 6.7)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpApp {
    /// Application subtype, carried in the header's count field
    pub subtype: u8,

    /// SSRC of the sender
    pub ssrc: RtpSsrc,

    /// Four ASCII characters naming the application
    pub name: [u8; 4],

    /// Application payload, a whole number of 32-bit words
    pub data: Bytes,
}

impl RtcpApp {
    /// Create an APP packet
    pub fn new(ssrc: RtpSsrc, subtype: u8, name: [u8; 4], data: Bytes) -> Self {
        Self {
            subtype,
            ssrc,
            name,
            data,
        }
    }

    /// Parse an APP body; `count` is the header's subtype field
    pub fn parse(count: u8, body: &[u8]) -> Result<Self> {
        if body.len() < 8 {
            return Err(Error::BufferTooSmall {
                required: 8,
                available: body.len(),
            });
        }

        let mut buf = body;
        let ssrc = buf.get_u32();
        let mut name = [0u8; 4];
        buf.copy_to_slice(&mut name);

        Ok(Self {
            subtype: count & 0x1F,
            ssrc,
            name,
            data: Bytes::copy_from_slice(buf),
        })
    }

    /// Serialize header and body, zero-padding the data to a word boundary
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        if self.subtype > 0x1F {
            return Err(Error::InvalidConfig {
                details: format!("APP subtype {} exceeds 5 bits", self.subtype),
            });
        }

        let padded_data = (self.data.len() + 3) & !3;
        let body_len = 8 + padded_data;

        RtcpHeader::new(RtcpPacketType::ApplicationDefined, self.subtype, body_len)
            .serialize(buf);

        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        buf.extend_from_slice(&self.name);
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&[0u8; 3][..padded_data - self.data.len()]);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_roundtrip() {
        let app = RtcpApp::new(0x4444_0001, 7, *b"qmon", Bytes::from_static(b"12345678"));

        let mut buf = BytesMut::new();
        app.serialize(&mut buf).unwrap();
        assert_eq!(buf.len() % 4, 0);

        let mut head = &buf[..4];
        let header = RtcpHeader::parse(&mut head).unwrap();
        assert_eq!(header.packet_type, RtcpPacketType::ApplicationDefined);
        assert_eq!(header.count, 7);

        let parsed = RtcpApp::parse(header.count, &buf[4..]).unwrap();
        assert_eq!(parsed, app);
    }

    #[test]
    fn test_app_data_padded_to_word() {
        let app = RtcpApp::new(1, 0, *b"test", Bytes::from_static(b"abc"));
        let mut buf = BytesMut::new();
        app.serialize(&mut buf).unwrap();
        // header + ssrc + name + 3 data bytes + 1 pad
        assert_eq!(buf.len(), 16);
    }

    #[test]
    fn test_app_truncated_rejected() {
        let body = [0u8; 6];
        assert!(matches!(
            RtcpApp::parse(0, &body),
            Err(Error::BufferTooSmall { required: 8, .. })
        ));
    }

    #[test]
    fn test_app_subtype_range_enforced() {
        let app = RtcpApp::new(1, 32, *b"oops", Bytes::new());
        let mut buf = BytesMut::new();
        assert!(matches!(
            app.serialize(&mut buf),
            Err(Error::InvalidConfig { .. })
        ));
    }
}
