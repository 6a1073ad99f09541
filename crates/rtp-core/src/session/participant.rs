//! Session membership: one record per remote SSRC
//!
//! The table never shrinks. A participant that leaves is soft-removed: the
//! record is marked invalid, its SSRC zeroed and unindexed, and the slot goes
//! on a free list for the next insert. Capacity is fixed when the session
//! opens.

use std::collections::HashMap;

use crate::error::Error;
use crate::packet::rtcp::{NtpTimestamp, RtcpReportBlock};
use crate::session::source::RtpSource;
use crate::{Result, RtpSsrc};

/// Snapshot of the most recent sender report heard from a participant
#[derive(Debug, Clone, Copy)]
pub struct RemoteSenderReport {
    /// NTP timestamp the sender stamped
    pub ntp: NtpTimestamp,

    /// RTP timestamp paired with it
    pub rtp_timestamp: u32,

    /// Sender's cumulative packet count
    pub packet_count: u32,

    /// Sender's cumulative octet count
    pub octet_count: u32,

    /// Local wallclock when the SR arrived, for the DLSR field
    pub arrival: NtpTimestamp,
}

/// State kept per remote participant
#[derive(Debug, Clone)]
pub struct Participant {
    /// The participant's SSRC; zero once soft-removed
    pub ssrc: RtpSsrc,

    /// Soft-removed: invisible to lookups, slot awaiting reuse
    pub invalid: bool,

    /// RTP heard from this source since our last report went out
    pub active: bool,

    /// Sequence, loss and jitter state
    pub source: RtpSource,

    /// Last SR heard from this source
    pub last_sender_report: Option<RemoteSenderReport>,

    /// The report block this source last sent about us
    pub report_about_us: Option<RtcpReportBlock>,

    /// CNAME from this source's SDES
    pub cname: Option<String>,
}

impl Participant {
    fn new(ssrc: RtpSsrc, seq: u16) -> Self {
        Self {
            ssrc,
            invalid: false,
            active: false,
            source: RtpSource::new(seq),
            last_sender_report: None,
            report_about_us: None,
            cname: None,
        }
    }
}

/// Fixed-capacity participant table indexed by SSRC
#[derive(Debug)]
pub struct ParticipantTable {
    slots: Vec<Participant>,
    index: HashMap<RtpSsrc, usize>,
    free: Vec<usize>,
    capacity: usize,
}

impl ParticipantTable {
    /// Create a table holding at most `capacity` concurrent participants
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity.min(64)),
            index: HashMap::new(),
            free: Vec::new(),
            capacity,
        }
    }

    /// Number of valid participants
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no valid participants exist
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of slots ever allocated, including invalidated ones
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Look up a valid participant
    pub fn get(&self, ssrc: RtpSsrc) -> Option<&Participant> {
        self.index.get(&ssrc).map(|&i| &self.slots[i])
    }

    /// Look up a valid participant for update
    pub fn get_mut(&mut self, ssrc: RtpSsrc) -> Option<&mut Participant> {
        let i = *self.index.get(&ssrc)?;
        Some(&mut self.slots[i])
    }

    /// Insert a participant first heard at sequence `seq`, reusing an
    /// invalidated slot when the table is at capacity.
    pub fn insert(&mut self, ssrc: RtpSsrc, seq: u16) -> Result<&mut Participant> {
        if let Some(&i) = self.index.get(&ssrc) {
            return Ok(&mut self.slots[i]);
        }

        let slot = if let Some(i) = self.free.pop() {
            self.slots[i] = Participant::new(ssrc, seq);
            i
        } else if self.slots.len() < self.capacity {
            self.slots.push(Participant::new(ssrc, seq));
            self.slots.len() - 1
        } else {
            return Err(Error::OutOfResources);
        };

        self.index.insert(ssrc, slot);
        Ok(&mut self.slots[slot])
    }

    /// Get an existing participant or lazily insert one
    pub fn get_or_insert(&mut self, ssrc: RtpSsrc, seq: u16) -> Result<&mut Participant> {
        self.insert(ssrc, seq)
    }

    /// Soft-remove a participant (BYE or timeout). Returns whether it was
    /// present.
    pub fn invalidate(&mut self, ssrc: RtpSsrc) -> bool {
        let Some(slot) = self.index.remove(&ssrc) else {
            return false;
        };
        let record = &mut self.slots[slot];
        record.invalid = true;
        record.ssrc = 0;
        self.free.push(slot);
        true
    }

    /// Iterate over valid participants
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.slots.iter().filter(|p| !p.invalid)
    }

    /// Iterate over valid participants for update
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Participant> {
        self.slots.iter_mut().filter(|p| !p.invalid)
    }

    /// Valid participants that sent RTP since the last report
    pub fn sender_count(&self) -> usize {
        self.iter().filter(|p| p.active).count()
    }
}
