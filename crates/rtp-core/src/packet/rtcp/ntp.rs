use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Offset between the NTP epoch (January 1, 1900) and the UNIX epoch
const NTP_TO_UNIX_OFFSET: u64 = 2_208_988_800;

/// 64-bit NTP timestamp as carried in RTCP sender reports (RFC 3550 Section 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtpTimestamp {
    /// Seconds since January 1, 1900
    pub seconds: u32,

    /// Fraction of a second in units of 2^-32 s
    pub fraction: u32,
}

impl NtpTimestamp {
    /// Capture the current wallclock as an NTP timestamp
    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::from_duration_since_unix_epoch(now)
    }

    /// Build from a duration since the UNIX epoch
    pub fn from_duration_since_unix_epoch(duration: Duration) -> Self {
        let seconds = duration.as_secs() + NTP_TO_UNIX_OFFSET;
        let fraction = ((duration.subsec_nanos() as u64) << 32) / 1_000_000_000;
        Self {
            seconds: seconds as u32,
            fraction: fraction as u32,
        }
    }

    /// Pack into the 64-bit wire form, seconds in the high half
    pub fn to_u64(&self) -> u64 {
        ((self.seconds as u64) << 32) | self.fraction as u64
    }

    /// Unpack from the 64-bit wire form
    pub fn from_u64(value: u64) -> Self {
        Self {
            seconds: (value >> 32) as u32,
            fraction: value as u32,
        }
    }

    /// Compact form: the middle 32 bits, i.e. 16.16 fixed-point seconds.
    ///
    /// This is the value RTCP report blocks carry in the LSR field and the
    /// unit DLSR is expressed in (RFC 3550 Section 6.4.1).
    pub fn to_u32(&self) -> u32 {
        ((self.seconds & 0x0000_FFFF) << 16) | (self.fraction >> 16)
    }

    /// Elapsed time since `earlier` as 16.16 fixed-point seconds.
    ///
    /// Wrapping on the compact form, so it stays correct across the 18-hour
    /// rollover of the middle bits as long as the gap itself is short.
    pub fn delay_since(&self, earlier: NtpTimestamp) -> u32 {
        self.to_u32().wrapping_sub(earlier.to_u32())
    }
}
