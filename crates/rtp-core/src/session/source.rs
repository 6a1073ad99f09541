//! Per-source sequence, loss and jitter tracking (RFC 3550 Appendix A.8)

/// Sequence number space
const RTP_SEQ_MOD: u32 = 1 << 16;

/// Forward jumps below this are treated as in-order (with loss)
const MAX_DROPOUT: u16 = 3000;

/// Backward jumps below this are treated as reordering, not a restart
const MAX_MISORDER: u16 = 100;

/// In-order packets required before a new source is trusted
const MIN_SEQUENTIAL: u32 = 2;

/// Reception state for one remote source.
///
/// A new source starts in probation and its packets are not counted until
/// [`MIN_SEQUENTIAL`] arrive in order; the packet that completes probation
/// re-baselines the statistics and counts as the first received packet.
#[derive(Debug, Clone)]
pub struct RtpSource {
    /// First sequence number of the current baseline
    base_seq: u32,

    /// Highest sequence number seen
    max_seq: u16,

    /// Sequence number cycle accumulator, in units of [`RTP_SEQ_MOD`]
    cycles: u32,

    /// Candidate sequence after a suspected restart, or out of range
    bad_seq: u32,

    /// In-order packets still required before the source is trusted
    probation: u32,

    /// Packets counted since the baseline
    received: u32,

    /// Snapshot of `received` at the previous report
    received_prior: u32,

    /// Snapshot of expected count at the previous report
    expected_prior: u32,

    /// Relative transit time of the previous packet, media clock units
    transit: Option<i32>,

    /// Jitter estimate scaled by 16
    jitter: u32,
}

impl RtpSource {
    /// Create reception state for a source first heard at `seq`.
    ///
    /// The state is seeded so that `seq` itself reads as in-order when it is
    /// fed to [`update_seq`](Self::update_seq).
    pub fn new(seq: u16) -> Self {
        let mut source = Self {
            base_seq: 0,
            max_seq: 0,
            cycles: 0,
            bad_seq: RTP_SEQ_MOD + 1,
            probation: MIN_SEQUENTIAL,
            received: 0,
            received_prior: 0,
            expected_prior: 0,
            transit: None,
            jitter: 0,
        };
        source.init_seq(seq);
        source.max_seq = seq.wrapping_sub(1);
        source
    }

    fn init_seq(&mut self, seq: u16) {
        self.base_seq = seq as u32;
        self.max_seq = seq;
        self.bad_seq = RTP_SEQ_MOD + 1;
        self.cycles = 0;
        self.received = 0;
        self.received_prior = 0;
        self.expected_prior = 0;
    }

    /// Feed one arriving sequence number. Returns whether the packet was
    /// counted into the statistics.
    pub fn update_seq(&mut self, seq: u16) -> bool {
        let udelta = seq.wrapping_sub(self.max_seq);

        if self.probation > 0 {
            if seq == self.max_seq.wrapping_add(1) {
                self.probation -= 1;
                self.max_seq = seq;
                if self.probation == 0 {
                    self.init_seq(seq);
                    self.received += 1;
                    return true;
                }
            } else {
                self.probation = MIN_SEQUENTIAL - 1;
                self.max_seq = seq;
            }
            return false;
        }

        if udelta < MAX_DROPOUT {
            // In order, possibly with a gap
            if seq < self.max_seq {
                self.cycles += RTP_SEQ_MOD;
            }
            self.max_seq = seq;
        } else if udelta as u32 <= RTP_SEQ_MOD - MAX_MISORDER as u32 {
            // Large jump: trust it only if the next packet confirms it
            if seq as u32 == self.bad_seq {
                self.init_seq(seq);
            } else {
                self.bad_seq = (seq.wrapping_add(1)) as u32;
                return false;
            }
        }
        // else: duplicate or reordered packet, counted but max_seq untouched

        self.received += 1;
        true
    }

    /// Fold one packet's arrival into the interarrival jitter estimate.
    /// Both timestamps are in media clock units.
    pub fn update_jitter(&mut self, rtp_timestamp: u32, arrival: u32) {
        let transit = arrival.wrapping_sub(rtp_timestamp) as i32;
        if let Some(prev) = self.transit {
            let d = transit.wrapping_sub(prev).unsigned_abs();
            self.jitter = self
                .jitter
                .wrapping_add(d.wrapping_sub((self.jitter + 8) >> 4));
        }
        self.transit = Some(transit);
    }

    /// Extended highest sequence number: cycle count plus `max_seq`
    pub fn extended_highest(&self) -> u32 {
        self.cycles + self.max_seq as u32
    }

    /// Packets counted since the baseline
    pub fn received(&self) -> u32 {
        self.received
    }

    /// Interarrival jitter in media clock units
    pub fn jitter(&self) -> u32 {
        self.jitter >> 4
    }

    /// Packets expected since the baseline
    fn expected(&self) -> u32 {
        self.extended_highest()
            .wrapping_sub(self.base_seq)
            .wrapping_add(1)
    }

    /// Cumulative packets lost, floored at zero. A source still in probation
    /// has no trusted baseline and reports no loss.
    pub fn cumulative_lost(&self) -> u32 {
        if self.probation > 0 {
            return 0;
        }
        self.expected().saturating_sub(self.received)
    }

    /// Fraction of packets lost since the previous call, as 8-bit fixed
    /// point. Advances the per-report interval snapshot. Zero while the
    /// source is in probation.
    pub fn fraction_lost(&mut self) -> u8 {
        if self.probation > 0 {
            return 0;
        }
        let expected = self.expected();
        let expected_interval = expected.saturating_sub(self.expected_prior);
        self.expected_prior = expected;

        let received_interval = self.received.saturating_sub(self.received_prior);
        self.received_prior = self.received;

        if expected_interval == 0 || received_interval >= expected_interval {
            return 0;
        }
        let lost_interval = expected_interval - received_interval;
        ((lost_interval << 8) / expected_interval) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(source: &mut RtpSource, seqs: impl IntoIterator<Item = u16>) -> u32 {
        seqs.into_iter()
            .filter(|&s| source.update_seq(s))
            .count() as u32
    }

    #[test]
    fn test_probation_consumes_first_packet() {
        let mut source = RtpSource::new(100);
        // First in-order packet only advances probation
        assert!(!source.update_seq(100));
        assert_eq!(source.received(), 0);
        // Second re-baselines and counts
        assert!(source.update_seq(101));
        assert_eq!(source.received(), 1);
    }

    #[test]
    fn test_ten_in_order_packets() {
        let mut source = RtpSource::new(100);
        feed(&mut source, 100..110);
        assert_eq!(source.received(), 9);
        assert_eq!(source.extended_highest(), 109);
        assert_eq!(source.cumulative_lost(), 0);
    }

    #[test]
    fn test_probation_source_reports_no_loss() {
        let mut source = RtpSource::new(100);
        assert_eq!(source.cumulative_lost(), 0);
        // One packet in, still probationary: nothing counted, nothing lost
        assert!(!source.update_seq(100));
        assert_eq!(source.cumulative_lost(), 0);
        assert_eq!(source.fraction_lost(), 0);
    }

    #[test]
    fn test_unheard_source_reports_no_loss() {
        // Seeded at zero, as for a source first heard via RTCP only
        let mut source = RtpSource::new(0);
        assert_eq!(source.cumulative_lost(), 0);
        assert_eq!(source.fraction_lost(), 0);
    }

    #[test]
    fn test_out_of_order_during_probation_restarts_it() {
        let mut source = RtpSource::new(100);
        assert!(!source.update_seq(100));
        // Gap during probation: back to one required in-order packet
        assert!(!source.update_seq(105));
        assert!(source.update_seq(106));
        assert_eq!(source.received(), 1);
    }

    #[test]
    fn test_gap_counts_loss() {
        let mut source = RtpSource::new(0);
        feed(&mut source, 0..5);
        // Drop 5..=9, resume at 10
        feed(&mut source, 10..15);
        assert_eq!(source.extended_highest(), 14);
        assert_eq!(source.cumulative_lost(), 5);
        // 9 counted of 14 expected in the interval... fraction over the
        // whole baseline here since no prior report was taken
        let fraction = source.fraction_lost();
        assert_eq!(fraction as u32, (5u32 << 8) / 14);
        // Second report with no new packets reports nothing lost
        assert_eq!(source.fraction_lost(), 0);
    }

    #[test]
    fn test_wraparound_increments_cycles() {
        let mut source = RtpSource::new(65534);
        feed(&mut source, [65534, 65535, 0, 1]);
        assert_eq!(source.extended_highest(), RTP_SEQ_MOD + 1);
        assert_eq!(source.received(), 3);
        assert_eq!(source.cumulative_lost(), 0);
    }

    #[test]
    fn test_restart_requires_confirmation() {
        let mut source = RtpSource::new(1000);
        feed(&mut source, 1000..1004);
        // Jump far ahead: first packet dropped, flagged
        assert!(!source.update_seq(30000));
        assert_eq!(source.received(), 3);
        // Confirmation re-baselines at the new sequence
        assert!(source.update_seq(30001));
        assert_eq!(source.received(), 1);
        assert_eq!(source.extended_highest(), 30001);
        assert_eq!(source.cumulative_lost(), 0);
    }

    #[test]
    fn test_duplicate_counted_without_advancing() {
        let mut source = RtpSource::new(10);
        feed(&mut source, 10..14);
        let highest = source.extended_highest();
        // Old packet within the misorder window
        assert!(source.update_seq(12));
        assert_eq!(source.extended_highest(), highest);
        assert_eq!(source.received(), 4);
    }

    #[test]
    fn test_jitter_zero_for_uniform_spacing() {
        let mut source = RtpSource::new(0);
        for i in 0..20u32 {
            source.update_seq(i as u16);
            // Perfectly paced: transit constant
            source.update_jitter(i * 160, 5000 + i * 160);
        }
        assert_eq!(source.jitter(), 0);
    }

    #[test]
    fn test_jitter_grows_with_variation() {
        let mut source = RtpSource::new(0);
        for i in 0..50u32 {
            source.update_seq(i as u16);
            let wobble = if i % 2 == 0 { 0 } else { 80 };
            source.update_jitter(i * 160, 5000 + i * 160 + wobble);
        }
        assert!(source.jitter() > 0);
    }
}
