use bytes::{Buf, BytesMut};

use crate::error::Error;
use crate::packet::rtcp::{RtcpHeader, RtcpPacketType};
use crate::{Result, RtpSsrc};

/// Longest SDES item value we will build or accept
pub const MAX_SDES_VALUE: usize = 255;

/// SDES item types (RFC 3550 Section 6.5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdesItemType {
    /// Canonical endpoint identifier, mandatory in every SDES
    Cname,
    /// User's display name
    Name,
    /// Email address
    Email,
    /// Phone number
    Phone,
    /// Geographic location
    Location,
    /// Application or tool name
    Tool,
    /// Transient note about the source
    Note,
    /// Private extension
    Priv,
}

impl SdesItemType {
    /// Map a wire byte; only 1..=8 are defined
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Cname),
            2 => Ok(Self::Name),
            3 => Ok(Self::Email),
            4 => Ok(Self::Phone),
            5 => Ok(Self::Location),
            6 => Ok(Self::Tool),
            7 => Ok(Self::Note),
            8 => Ok(Self::Priv),
            _ => Err(Error::InvalidSdesType { value }),
        }
    }

    /// Wire byte for this item type
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Cname => 1,
            Self::Name => 2,
            Self::Email => 3,
            Self::Phone => 4,
            Self::Location => 5,
            Self::Tool => 6,
            Self::Note => 7,
            Self::Priv => 8,
        }
    }
}

/// One SDES item: a typed text value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesItem {
    /// Item type
    pub item_type: SdesItemType,

    /// Item text
    pub value: String,
}

impl SdesItem {
    /// CNAME item
    pub fn cname(value: impl Into<String>) -> Self {
        Self {
            item_type: SdesItemType::Cname,
            value: value.into(),
        }
    }
}

/// SDES chunk: one SSRC and its items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesChunk {
    /// Source the items describe
    pub ssrc: RtpSsrc,

    /// Items, usually led by CNAME
    pub items: Vec<SdesItem>,
}

/// RTCP source description packet (RFC 3550 Section 6.5)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RtcpSdes {
    /// Chunks, one per described source
    pub chunks: Vec<SdesChunk>,
}

impl RtcpSdes {
    /// SDES carrying a single CNAME chunk
    pub fn with_cname(ssrc: RtpSsrc, cname: impl Into<String>) -> Self {
        Self {
            chunks: vec![SdesChunk {
                ssrc,
                items: vec![SdesItem::cname(cname)],
            }],
        }
    }

    /// Parse an SDES body; `count` is the header's chunk count.
    ///
    /// Item type bytes outside 1..=8 are skipped, not fatal; their length
    /// byte still tells us how far to advance.
    pub fn parse(count: u8, body: &[u8]) -> Result<Self> {
        let mut buf = body;
        let mut chunks = Vec::with_capacity(count as usize);

        for _ in 0..count {
            if buf.remaining() < 4 {
                return Err(Error::IllegalPacket("SDES chunk truncated"));
            }
            let ssrc = buf.get_u32();
            let mut items = Vec::new();
            let mut consumed = 4usize;

            loop {
                if buf.remaining() == 0 {
                    return Err(Error::IllegalPacket("SDES chunk missing terminator"));
                }
                let type_byte = buf.get_u8();
                consumed += 1;
                if type_byte == 0 {
                    // Null terminator, then zero padding to the next word
                    while consumed % 4 != 0 {
                        if buf.remaining() == 0 {
                            return Err(Error::IllegalPacket("SDES chunk padding truncated"));
                        }
                        buf.get_u8();
                        consumed += 1;
                    }
                    break;
                }

                if buf.remaining() == 0 {
                    return Err(Error::IllegalPacket("SDES item missing length"));
                }
                let len = buf.get_u8() as usize;
                consumed += 1;
                if len > buf.remaining() {
                    return Err(Error::IllegalPacket("SDES item overruns packet"));
                }
                let value = String::from_utf8_lossy(&buf[..len]).into_owned();
                buf.advance(len);
                consumed += len;

                if let Ok(item_type) = SdesItemType::from_u8(type_byte) {
                    items.push(SdesItem { item_type, value });
                }
            }

            chunks.push(SdesChunk { ssrc, items });
        }

        Ok(Self { chunks })
    }

    /// Serialize header and body; each chunk is null-terminated and padded to
    /// a word boundary
    pub fn serialize(&self, buf: &mut BytesMut) -> Result<()> {
        if self.chunks.is_empty() || self.chunks.len() > 31 {
            return Err(Error::InvalidConfig {
                details: format!("SDES must carry 1..=31 chunks, got {}", self.chunks.len()),
            });
        }

        let mut body_len = 0usize;
        for chunk in &self.chunks {
            let mut chunk_len = 4;
            for item in &chunk.items {
                if item.value.len() > MAX_SDES_VALUE {
                    return Err(Error::InvalidConfig {
                        details: format!(
                            "SDES item of {} bytes exceeds 255",
                            item.value.len()
                        ),
                    });
                }
                chunk_len += 2 + item.value.len();
            }
            // Terminator plus pad to word
            chunk_len += 1;
            chunk_len = (chunk_len + 3) & !3;
            body_len += chunk_len;
        }

        RtcpHeader::new(
            RtcpPacketType::SourceDescription,
            self.chunks.len() as u8,
            body_len,
        )
        .serialize(buf);

        for chunk in &self.chunks {
            buf.extend_from_slice(&chunk.ssrc.to_be_bytes());
            let mut written = 4;
            for item in &chunk.items {
                buf.extend_from_slice(&[item.item_type.to_u8(), item.value.len() as u8]);
                buf.extend_from_slice(item.value.as_bytes());
                written += 2 + item.value.len();
            }
            buf.extend_from_slice(&[0]);
            written += 1;
            while written % 4 != 0 {
                buf.extend_from_slice(&[0]);
                written += 1;
            }
        }

        Ok(())
    }

    /// First CNAME found across all chunks
    pub fn cname(&self) -> Option<(&str, RtpSsrc)> {
        for chunk in &self.chunks {
            for item in &chunk.items {
                if item.item_type == SdesItemType::Cname {
                    return Some((&item.value, chunk.ssrc));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdes_cname_roundtrip() {
        let sdes = RtcpSdes::with_cname(0x7777_0001, "bob@host.example");

        let mut buf = BytesMut::new();
        sdes.serialize(&mut buf).unwrap();
        assert_eq!(buf.len() % 4, 0);

        let mut head = &buf[..4];
        let header = RtcpHeader::parse(&mut head).unwrap();
        assert_eq!(header.packet_type, RtcpPacketType::SourceDescription);
        assert_eq!(header.count, 1);

        let parsed = RtcpSdes::parse(header.count, &buf[4..]).unwrap();
        assert_eq!(parsed, sdes);
        assert_eq!(parsed.cname(), Some(("bob@host.example", 0x7777_0001)));
    }

    #[test]
    fn test_sdes_multiple_items_roundtrip() {
        let sdes = RtcpSdes {
            chunks: vec![SdesChunk {
                ssrc: 42,
                items: vec![
                    SdesItem::cname("carol@host"),
                    SdesItem {
                        item_type: SdesItemType::Tool,
                        value: "rtpkit".to_string(),
                    },
                ],
            }],
        };

        let mut buf = BytesMut::new();
        sdes.serialize(&mut buf).unwrap();
        let mut head = &buf[..4];
        let header = RtcpHeader::parse(&mut head).unwrap();
        let parsed = RtcpSdes::parse(header.count, &buf[4..]).unwrap();
        assert_eq!(parsed, sdes);
    }

    #[test]
    fn test_sdes_unknown_item_skipped() {
        // ssrc, unknown type 9 with 2-byte value, CNAME "a", terminator + pad
        let body = [
            0, 0, 0, 7, //
            9, 2, b'z', b'z', //
            1, 1, b'a', //
            0,
        ];
        let parsed = RtcpSdes::parse(1, &body).unwrap();
        assert_eq!(parsed.chunks[0].items.len(), 1);
        assert_eq!(parsed.chunks[0].items[0].item_type, SdesItemType::Cname);
    }

    #[test]
    fn test_sdes_missing_terminator_rejected() {
        let body = [0, 0, 0, 7, 1, 1, b'a'];
        assert!(matches!(
            RtcpSdes::parse(1, &body),
            Err(Error::IllegalPacket(_))
        ));
    }

    #[test]
    fn test_sdes_item_overrun_rejected() {
        let body = [0, 0, 0, 7, 1, 200, b'a', 0];
        assert!(matches!(
            RtcpSdes::parse(1, &body),
            Err(Error::IllegalPacket("SDES item overruns packet"))
        ));
    }
}
