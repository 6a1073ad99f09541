use bytes::{Buf, BufMut, BytesMut};

use crate::error::Error;
use crate::{Result, RtpSsrc};

/// Reception report block carried in SR and RR packets
/// (RFC 3550 Sections 6.4.1 and 6.4.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RtcpReportBlock {
    /// SSRC of the source this block reports on
    pub ssrc: RtpSsrc,

    /// Fraction of packets lost since the previous report, 8-bit fixed point
    pub fraction_lost: u8,

    /// Cumulative packets lost, 24 bits on the wire
    pub cumulative_lost: u32,

    /// Extended highest sequence number received (cycles + max_seq)
    pub highest_seq: u32,

    /// Interarrival jitter in timestamp units
    pub jitter: u32,

    /// Compact NTP timestamp of the last SR received from this source
    pub last_sr: u32,

    /// Delay since that SR in 1/65536 second units
    pub delay_since_last_sr: u32,
}

impl RtcpReportBlock {
    /// Wire size of one report block
    pub const SIZE: usize = 24;

    /// Create an empty block for `ssrc`
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self {
            ssrc,
            ..Default::default()
        }
    }

    /// Parse one report block
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(Error::BufferTooSmall {
                required: Self::SIZE,
                available: buf.remaining(),
            });
        }

        let ssrc = buf.get_u32();

        // One word: fraction lost in the top byte, cumulative lost below it
        let loss_word = buf.get_u32();
        let fraction_lost = (loss_word >> 24) as u8;
        let cumulative_lost = loss_word & 0x00FF_FFFF;

        Ok(Self {
            ssrc,
            fraction_lost,
            cumulative_lost,
            highest_seq: buf.get_u32(),
            jitter: buf.get_u32(),
            last_sr: buf.get_u32(),
            delay_since_last_sr: buf.get_u32(),
        })
    }

    /// Serialize this block
    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ssrc);
        buf.put_u32(((self.fraction_lost as u32) << 24) | (self.cumulative_lost & 0x00FF_FFFF));
        buf.put_u32(self.highest_seq);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sr);
        buf.put_u32(self.delay_since_last_sr);
    }
}
