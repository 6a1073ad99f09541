//! RTCP transmission interval computation (RFC 3550 Section 6.3)
//!
//! The interval scales with group size and the running average report size,
//! is floored at 5 seconds (half that before the first report), randomized
//! to a uniform [0.5, 1.5) multiple, and divided by 1.21828 to compensate
//! for the timer reconsideration the randomization introduces.

use std::time::Duration;

use rand::rngs::SmallRng;
use rand::Rng;

use crate::RTCP_PACKET_OVERHEAD;

/// Minimum interval between reports, milliseconds
const MIN_INTERVAL_MS: u64 = 5000;

/// Assumed compound size before the first report goes out, without overhead
const INITIAL_AVG_PACKET_SIZE: u32 = 100;

/// Compensation divisor 1.21828 as a 100000/121828 fixed-point pair
const COMPENSATION_NUM: u64 = 100_000;
const COMPENSATION_DEN: u64 = 121_828;

/// State feeding the transmission interval computation
#[derive(Debug, Clone)]
pub struct RtcpIntervalState {
    /// Session bandwidth budget for RTCP, bytes per second. Zero disables
    /// periodic reporting entirely.
    pub bandwidth: u32,

    /// EMA of sent compound sizes including UDP/IP overhead
    pub average_packet_size: u32,

    /// Current member count, ourselves included
    pub members: u32,

    /// Member count at the time of the previous report
    pub pmembers: u32,

    /// Current sender count, ourselves included while we send
    pub senders: u32,

    /// True until the first report is sent; halves the minimum interval
    pub initialized: bool,
}

impl RtcpIntervalState {
    /// Fresh state for a newly opened session
    pub fn new(bandwidth: u32) -> Self {
        Self {
            bandwidth,
            average_packet_size: INITIAL_AVG_PACKET_SIZE + RTCP_PACKET_OVERHEAD,
            members: 1,
            pmembers: 1,
            senders: 0,
            initialized: true,
        }
    }

    /// Fold a sent compound's size (before overhead) into the average:
    /// 15 parts old, 1 part new.
    pub fn update_average(&mut self, sent_size: usize) {
        let with_overhead = sent_size as u32 + RTCP_PACKET_OVERHEAD;
        self.average_packet_size =
            (self.average_packet_size * 15 + with_overhead) / 16;
    }

    /// Bookkeeping after a scheduled report goes out
    pub fn on_report_sent(&mut self) {
        self.initialized = false;
        self.pmembers = self.members;
    }

    /// Compute the next randomized interval, or `None` when periodic RTCP is
    /// disabled by a zero bandwidth.
    pub fn compute_interval(&self, we_sent: bool, rng: &mut SmallRng) -> Option<Duration> {
        if self.bandwidth == 0 {
            return None;
        }

        let mut bandwidth = self.bandwidth as u64;
        let mut n = self.members.max(1) as u64;

        // Dedicate a quarter of the bandwidth to senders while they are a
        // quarter or less of the group
        if self.senders as u64 <= n / 4 {
            if we_sent {
                bandwidth = bandwidth * 25 / 100;
                n = (self.senders as u64).max(1);
            } else {
                bandwidth = bandwidth * 75 / 100;
                n -= self.senders as u64;
            }
        }

        let mut interval_ms = self.average_packet_size as u64 * n * 1000 / bandwidth.max(1);

        let min_ms = if self.initialized {
            MIN_INTERVAL_MS / 2
        } else {
            MIN_INTERVAL_MS
        };
        if interval_ms < min_ms {
            interval_ms = min_ms;
        }

        // Randomize to [0.5, 1.5) of the deterministic value
        let factor = rng.gen_range(500..1500u64);
        interval_ms = interval_ms * factor / 1000;

        // Compensate for the mean the randomization introduces
        interval_ms = interval_ms * COMPENSATION_NUM / COMPENSATION_DEN;

        Some(Duration::from_millis(interval_ms))
    }
}
