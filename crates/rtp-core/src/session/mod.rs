//! RTCP session engine: membership, reports, scheduling and lifecycle
//!
//! An [`RtcpSession`] owns the participant table and the report machinery.
//! Two tokio tasks serve it, both holding only a weak reference so dropping
//! the session ends them: the scheduler task (periodic compound reports per
//! RFC 3550 Section 6.3) and an optional receiver task feeding inbound
//! compounds from the transport. `close` aborts and awaits both.

pub mod participant;
pub mod rtp;
pub mod scheduling;
pub mod source;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::Error;
use crate::events::RtcpEvent;
use crate::packet::rtcp::{
    NtpTimestamp, RtcpApp, RtcpCompoundReader, RtcpGoodbye, RtcpPacket, RtcpReceiverReport,
    RtcpReportBlock, RtcpSdes, RtcpSenderReport, SdesChunk, SdesItem, SdesItemType,
};
use crate::payload::standard_clock_rate;
use crate::session::participant::{ParticipantTable, RemoteSenderReport};
use crate::session::scheduling::RtcpIntervalState;
use crate::transport::SharedTransport;
use crate::{Result, RtpSsrc, MAX_RTCP_PACKET};

/// Below this member count a shutdown BYE goes out immediately; at or above
/// it the BYE waits for the next scheduled transmission slot
const BYE_BACKOFF_MINIMUM: usize = 50;

/// Most report blocks one compound will carry
const MAX_BLOCKS_PER_REPORT: usize = 31;

/// Configuration for opening an RTCP session
#[derive(Debug, Clone)]
pub struct RtcpSessionConfig {
    /// Canonical name placed in every SDES; required, at most 255 bytes
    pub cname: String,

    /// Our SSRC; generated randomly when `None`
    pub ssrc: Option<RtpSsrc>,

    /// RTCP bandwidth budget in bytes per second; zero disables periodic
    /// reports
    pub bandwidth: u32,

    /// Participant table capacity
    pub max_participants: usize,

    /// Event channel depth
    pub event_capacity: usize,
}

impl Default for RtcpSessionConfig {
    fn default() -> Self {
        Self {
            cname: String::new(),
            ssrc: None,
            bandwidth: 1000,
            max_participants: 64,
            event_capacity: 32,
        }
    }
}

/// Read-only snapshot of what we know about one remote source
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// The source's SSRC
    pub ssrc: RtpSsrc,

    /// Whether it sent RTP since our last report
    pub active: bool,

    /// CNAME from its SDES, if heard
    pub cname: Option<String>,

    /// Cumulative packets lost
    pub cumulative_lost: u32,

    /// Interarrival jitter in media clock units
    pub jitter: u32,

    /// Extended highest sequence number received
    pub extended_highest_seq: u32,

    /// Its most recent sender report
    pub last_sender_report: Option<RemoteSenderReport>,
}

struct RtcpSessionInner {
    ssrc: RtpSsrc,
    sdes: HashMap<SdesItemType, String>,
    participants: ParticipantTable,
    interval: RtcpIntervalState,
    rng: SmallRng,

    /// Two-tick sender decay: 2 right after an RTP send, SR only while 2
    we_sent: u8,

    /// 0 none, 1 detected (BYE pending), 2 collision BYE sent
    collision: u8,

    shutdown: bool,
    shutdown_reason: Option<String>,

    /// Shutdown BYE waiting for the next scheduled transmission
    bye_deferred: bool,

    packet_count: u32,
    octet_count: u32,
    last_send_ntp: Option<NtpTimestamp>,
    last_rtp_timestamp: u32,
    payload_type: u8,

    remote_addrs: Vec<SocketAddr>,
    previous_time: Option<Instant>,
    timer_armed: bool,
}

impl RtcpSessionInner {
    /// Refresh the interval state's member and sender counts from the table
    fn refresh_counts(&mut self) {
        self.interval.members = self.participants.len() as u32 + 1;
        let mut senders = self.participants.sender_count() as u32;
        if self.we_sent > 0 {
            senders += 1;
        }
        self.interval.senders = senders;
    }

    /// RTP timestamp to stamp into an SR built at `now`: the last sent
    /// timestamp extrapolated by the elapsed wallclock time at the payload's
    /// clock rate, in 16.16 fixed point with rounding.
    fn estimated_rtp_timestamp(&self, now: NtpTimestamp) -> u32 {
        let Some(last_ntp) = self.last_send_ntp else {
            return self.last_rtp_timestamp;
        };
        let Some(clock_rate) = standard_clock_rate(self.payload_type) else {
            return self.last_rtp_timestamp;
        };
        let delta = now.delay_since(last_ntp) as u64;
        let advance = ((clock_rate as u64 * delta + 0x8000) >> 16) as u32;
        self.last_rtp_timestamp.wrapping_add(advance)
    }

    /// Collect report blocks for sources active since the last report,
    /// clearing their active flags.
    fn take_report_blocks(&mut self, now: NtpTimestamp) -> Vec<RtcpReportBlock> {
        let mut blocks = Vec::new();
        for p in self.participants.iter_mut() {
            if !p.active || blocks.len() == MAX_BLOCKS_PER_REPORT {
                continue;
            }
            p.active = false;

            let mut block = RtcpReportBlock::new(p.ssrc);
            block.fraction_lost = p.source.fraction_lost();
            block.cumulative_lost = p.source.cumulative_lost();
            block.highest_seq = p.source.extended_highest();
            block.jitter = p.source.jitter();
            if let Some(sr) = &p.last_sender_report {
                block.last_sr = sr.ntp.to_u32();
                block.delay_since_last_sr = now.delay_since(sr.arrival);
            }
            blocks.push(block);
        }
        blocks
    }

    fn sdes_packet(&self) -> RtcpSdes {
        let mut items: Vec<SdesItem> = Vec::new();
        if let Some(cname) = self.sdes.get(&SdesItemType::Cname) {
            items.push(SdesItem::cname(cname.clone()));
        }
        for (item_type, value) in &self.sdes {
            if *item_type != SdesItemType::Cname {
                items.push(SdesItem {
                    item_type: *item_type,
                    value: value.clone(),
                });
            }
        }
        RtcpSdes {
            chunks: vec![SdesChunk {
                ssrc: self.ssrc,
                items,
            }],
        }
    }

    /// Build the periodic compound: SR or RR, then SDES, then a collision
    /// BYE when one is pending. Decays `we_sent`.
    fn build_report(&mut self) -> Result<BytesMut> {
        let now = NtpTimestamp::now();
        let mut buf = BytesMut::with_capacity(MAX_RTCP_PACKET);
        let blocks = self.take_report_blocks(now);

        if self.we_sent == 2 {
            self.we_sent = 1;
            let mut sr = RtcpSenderReport::new(self.ssrc);
            sr.ntp_timestamp = now;
            sr.rtp_timestamp = self.estimated_rtp_timestamp(now);
            sr.sender_packet_count = self.packet_count;
            sr.sender_octet_count = self.octet_count;
            sr.report_blocks = blocks;
            sr.serialize(&mut buf)?;
        } else {
            if self.we_sent == 1 {
                self.we_sent = 0;
            }
            let mut rr = RtcpReceiverReport::new(self.ssrc);
            rr.report_blocks = blocks;
            rr.serialize(&mut buf)?;
        }

        self.sdes_packet().serialize(&mut buf)?;

        if self.collision == 1 {
            RtcpGoodbye::new(self.ssrc).serialize(&mut buf)?;
            self.collision = 2;
        }

        Ok(buf)
    }

    /// Build the leave compound: empty RR, SDES, BYE with the reason
    fn build_bye(&mut self, reason: Option<String>) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(MAX_RTCP_PACKET);
        RtcpReceiverReport::new(self.ssrc).serialize(&mut buf)?;
        self.sdes_packet().serialize(&mut buf)?;
        let mut bye = RtcpGoodbye::new(self.ssrc);
        bye.reason = reason;
        bye.serialize(&mut buf)?;
        Ok(buf)
    }

    /// Apply one inbound RTCP packet. A leading SSRC equal to ours flags a
    /// collision and fails; effects of packets handled before a failure
    /// stand.
    fn handle_packet(
        &mut self,
        packet: RtcpPacket,
        events: &mpsc::Sender<RtcpEvent>,
    ) -> Result<()> {
        let now = NtpTimestamp::now();
        match packet {
            RtcpPacket::SenderReport(sr) => {
                if sr.ssrc == self.ssrc {
                    self.collision = self.collision.max(1);
                    return Err(Error::SsrcCollision { ssrc: sr.ssrc });
                }
                let own_ssrc = self.ssrc;
                let p = self.participants.get_or_insert(sr.ssrc, 0)?;
                p.last_sender_report = Some(RemoteSenderReport {
                    ntp: sr.ntp_timestamp,
                    rtp_timestamp: sr.rtp_timestamp,
                    packet_count: sr.sender_packet_count,
                    octet_count: sr.sender_octet_count,
                    arrival: now,
                });
                if let Some(block) = sr.report_blocks.iter().find(|b| b.ssrc == own_ssrc) {
                    p.report_about_us = Some(*block);
                }
                let _ = events.try_send(RtcpEvent::ReportReceived { ssrc: sr.ssrc });
            }
            RtcpPacket::ReceiverReport(rr) => {
                if rr.ssrc == self.ssrc {
                    self.collision = self.collision.max(1);
                    return Err(Error::SsrcCollision { ssrc: rr.ssrc });
                }
                let own_ssrc = self.ssrc;
                let p = self.participants.get_or_insert(rr.ssrc, 0)?;
                if let Some(block) = rr.report_blocks.iter().find(|b| b.ssrc == own_ssrc) {
                    p.report_about_us = Some(*block);
                }
                let _ = events.try_send(RtcpEvent::ReportReceived { ssrc: rr.ssrc });
            }
            RtcpPacket::SourceDescription(sdes) => {
                for chunk in sdes.chunks {
                    if chunk.ssrc == self.ssrc {
                        continue;
                    }
                    let p = self.participants.get_or_insert(chunk.ssrc, 0)?;
                    for item in chunk.items {
                        if item.item_type == SdesItemType::Cname {
                            p.cname = Some(item.value);
                        } else {
                            let _ = events.try_send(RtcpEvent::SdesReceived {
                                ssrc: chunk.ssrc,
                                item: item.item_type,
                                value: item.value,
                            });
                        }
                    }
                }
            }
            RtcpPacket::Goodbye(bye) => {
                let mut reason = bye.reason;
                let mut sources = bye.sources.into_iter().peekable();
                while let Some(ssrc) = sources.next() {
                    if self.participants.invalidate(ssrc) {
                        debug!(ssrc, "participant left");
                    }
                    // The reason rides along once, with the last source
                    let reason = if sources.peek().is_none() {
                        reason.take()
                    } else {
                        None
                    };
                    let _ = events.try_send(RtcpEvent::ByeReceived { ssrc, reason });
                }
            }
            RtcpPacket::App(app) => {
                if app.ssrc == self.ssrc {
                    self.collision = self.collision.max(1);
                    return Err(Error::SsrcCollision { ssrc: app.ssrc });
                }
                let _ = events.try_send(RtcpEvent::AppReceived {
                    ssrc: app.ssrc,
                    subtype: app.subtype,
                    name: app.name,
                    data: app.data,
                });
            }
        }
        Ok(())
    }

    /// Walk one compound buffer, applying each sub-packet as it parses.
    ///
    /// Only a malformed sub-packet ends the walk. Per-packet semantic
    /// failures (a colliding SSRC, a full participant table) skip that
    /// sub-packet and keep walking. The first error either way is returned
    /// once the walk is over, with all other effects intact.
    fn process_buffer(&mut self, data: &[u8], events: &mpsc::Sender<RtcpEvent>) -> Result<()> {
        let mut reader = RtcpCompoundReader::new(data);
        let mut status = Ok(());
        while let Some(packet) = reader.next_packet() {
            let result = packet.and_then(|p| self.handle_packet(p, events));
            if status.is_ok() {
                status = result;
            }
        }
        status
    }
}

/// Handle to an open RTCP session. Clones share the same session.
#[derive(Clone)]
pub struct RtcpSession {
    inner: Arc<Mutex<RtcpSessionInner>>,
    transport: SharedTransport,
    events: mpsc::Sender<RtcpEvent>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl RtcpSession {
    /// Open a session over `transport`. Returns the session and the receive
    /// side of its event channel.
    pub fn open(
        config: RtcpSessionConfig,
        transport: SharedTransport,
    ) -> Result<(Self, mpsc::Receiver<RtcpEvent>)> {
        if config.cname.is_empty() || config.cname.len() > 255 {
            return Err(Error::InvalidConfig {
                details: format!("CNAME must be 1..=255 bytes, got {}", config.cname.len()),
            });
        }
        if config.max_participants == 0 {
            return Err(Error::InvalidConfig {
                details: "participant capacity must be nonzero".to_string(),
            });
        }

        let mut rng = SmallRng::from_entropy();
        let ssrc = config.ssrc.unwrap_or_else(|| rng.gen());

        let mut sdes = HashMap::new();
        sdes.insert(SdesItemType::Cname, config.cname);

        let inner = RtcpSessionInner {
            ssrc,
            sdes,
            participants: ParticipantTable::new(config.max_participants),
            interval: RtcpIntervalState::new(config.bandwidth),
            rng,
            we_sent: 0,
            collision: 0,
            shutdown: false,
            shutdown_reason: None,
            bye_deferred: false,
            packet_count: 0,
            octet_count: 0,
            last_send_ntp: None,
            last_rtp_timestamp: 0,
            payload_type: 0,
            remote_addrs: Vec::new(),
            previous_time: None,
            timer_armed: false,
        };

        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
        let session = Self {
            inner: Arc::new(Mutex::new(inner)),
            transport,
            events: tx,
            tasks: Arc::new(Mutex::new(Vec::new())),
        };
        Ok((session, rx))
    }

    /// Our SSRC
    pub fn ssrc(&self) -> RtpSsrc {
        self.inner.lock().ssrc
    }

    /// Replace our SSRC, clearing any pending collision
    pub fn set_ssrc(&self, ssrc: RtpSsrc) {
        let mut inner = self.inner.lock();
        inner.ssrc = ssrc;
        inner.collision = 0;
    }

    /// Replace the RTCP bandwidth budget, bytes per second
    pub fn set_bandwidth(&self, bandwidth: u32) {
        self.inner.lock().interval.bandwidth = bandwidth;
    }

    /// Payload type of the outgoing media, used to extrapolate SR timestamps
    pub fn set_payload_type(&self, payload_type: u8) {
        self.inner.lock().payload_type = payload_type;
    }

    /// Set or replace an SDES item sent with every report
    pub fn set_sdes_item(&self, item_type: SdesItemType, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        if value.is_empty() || value.len() > 255 {
            return Err(Error::InvalidConfig {
                details: format!("SDES item must be 1..=255 bytes, got {}", value.len()),
            });
        }
        self.inner.lock().sdes.insert(item_type, value);
        Ok(())
    }

    /// Whether a collision was detected and not yet resolved
    pub fn collision_detected(&self) -> bool {
        self.inner.lock().collision > 0
    }

    /// Add a destination for outgoing reports. The first address arms the
    /// report scheduler.
    pub fn add_remote_address(&self, addr: SocketAddr) {
        let arm = {
            let mut inner = self.inner.lock();
            inner.remote_addrs.push(addr);
            let arm = !inner.timer_armed;
            inner.timer_armed = true;
            arm
        };
        if arm {
            self.spawn_scheduler();
        }
    }

    /// Remove a destination; reports keep flowing to the rest
    pub fn remove_remote_address(&self, addr: SocketAddr) {
        self.inner.lock().remote_addrs.retain(|a| *a != addr);
    }

    /// Drop all destinations
    pub fn clear_remote_addresses(&self) {
        self.inner.lock().remote_addrs.clear();
    }

    /// Record an outgoing RTP packet: marks us a sender for the next two
    /// report intervals and stamps the NTP/RTP timestamp pair SRs build on.
    ///
    /// A pending collision is reported as an error after the packet is
    /// recorded.
    pub fn rtp_packet_sent(&self, payload_len: usize, rtp_timestamp: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.shutdown {
            return Err(Error::ShutdownInProgress);
        }
        inner.we_sent = 2;
        inner.packet_count = inner.packet_count.wrapping_add(1);
        inner.octet_count = inner.octet_count.wrapping_add(payload_len as u32);
        inner.last_send_ntp = Some(NtpTimestamp::now());
        inner.last_rtp_timestamp = rtp_timestamp;
        if inner.collision == 1 {
            return Err(Error::SsrcCollision { ssrc: inner.ssrc });
        }
        Ok(())
    }

    /// Record an incoming RTP packet. `arrival` is the local receive time
    /// already converted to media clock units for the jitter estimate.
    ///
    /// A packet carrying our own SSRC flags a collision and is not counted.
    pub fn rtp_packet_received(
        &self,
        ssrc: RtpSsrc,
        seq: u16,
        rtp_timestamp: u32,
        arrival: u32,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        if ssrc == inner.ssrc {
            inner.collision = inner.collision.max(1);
            return Err(Error::SsrcCollision { ssrc });
        }
        let p = inner.participants.get_or_insert(ssrc, seq)?;
        p.active = true;
        // Jitter only tracks packets the sequence machinery counts; probation
        // and restart candidates stay out of the estimate
        if p.source.update_seq(seq) {
            p.source.update_jitter(rtp_timestamp, arrival);
        }
        Ok(())
    }

    /// Process one inbound compound buffer. Sub-packets are applied as they
    /// parse; a malformed one stops processing, a semantic failure (such as
    /// an SSRC collision) skips its sub-packet only. The first error is
    /// returned, with all other effects intact.
    pub fn process_compound(&self, data: &[u8]) -> Result<()> {
        self.inner.lock().process_buffer(data, &self.events)
    }

    /// Build and send a report right now, outside the schedule. Not folded
    /// into the bandwidth average.
    pub async fn send_report_now(&self) -> Result<usize> {
        let (buf, addrs) = {
            let mut inner = self.inner.lock();
            if inner.shutdown {
                return Err(Error::ShutdownInProgress);
            }
            (inner.build_report()?, inner.remote_addrs.clone())
        };
        self.send_to_all(&buf, &addrs).await
    }

    /// Send an application-defined packet in a minimal compound
    pub async fn send_app(&self, subtype: u8, name: [u8; 4], data: Bytes) -> Result<usize> {
        let (buf, addrs) = {
            let mut inner = self.inner.lock();
            if inner.shutdown {
                return Err(Error::ShutdownInProgress);
            }
            let mut buf = BytesMut::with_capacity(MAX_RTCP_PACKET);
            RtcpReceiverReport::new(inner.ssrc).serialize(&mut buf)?;
            inner.sdes_packet().serialize(&mut buf)?;
            RtcpApp::new(inner.ssrc, subtype, name, data).serialize(&mut buf)?;
            (buf, inner.remote_addrs.clone())
        };
        self.send_to_all(&buf, &addrs).await
    }

    /// Leave the session. With fewer than [`BYE_BACKOFF_MINIMUM`] members
    /// the BYE goes out immediately; in large sessions it waits for our next
    /// scheduled transmission slot to avoid a BYE flood. When no scheduler
    /// can deliver it (periodic reporting disabled, or never armed) the BYE
    /// goes out immediately regardless of size. Either way the completion is
    /// surfaced as [`RtcpEvent::ShutdownCompleted`] and all later sends fail.
    pub async fn shutdown(&self, reason: Option<String>) -> Result<()> {
        let immediate = {
            let mut inner = self.inner.lock();
            if inner.shutdown {
                return Err(Error::ShutdownInProgress);
            }
            inner.shutdown = true;
            inner.shutdown_reason = reason.clone();
            let members = inner.participants.len() + 1;
            let scheduler_live = inner.timer_armed && inner.interval.bandwidth > 0;
            if members < BYE_BACKOFF_MINIMUM || !scheduler_live {
                Some((inner.build_bye(reason.clone())?, inner.remote_addrs.clone()))
            } else {
                inner.bye_deferred = true;
                None
            }
        };

        if let Some((buf, addrs)) = immediate {
            self.send_to_all(&buf, &addrs).await?;
            let _ = self
                .events
                .try_send(RtcpEvent::ShutdownCompleted { reason });
        }
        Ok(())
    }

    /// Immediate leave after an SSRC collision: BYE with reason "collision",
    /// no backoff.
    pub async fn disconnect_on_collision(&self) -> Result<()> {
        let (buf, addrs) = {
            let mut inner = self.inner.lock();
            inner.shutdown = true;
            inner.collision = 2;
            (
                inner.build_bye(Some("collision".to_string()))?,
                inner.remote_addrs.clone(),
            )
        };
        self.send_to_all(&buf, &addrs).await?;
        let _ = self.events.try_send(RtcpEvent::ShutdownCompleted {
            reason: Some("collision".to_string()),
        });
        Ok(())
    }

    /// Snapshot of a remote source
    pub fn source_info(&self, ssrc: RtpSsrc) -> Option<SourceInfo> {
        let inner = self.inner.lock();
        let p = inner.participants.get(ssrc)?;
        Some(SourceInfo {
            ssrc: p.ssrc,
            active: p.active,
            cname: p.cname.clone(),
            cumulative_lost: p.source.cumulative_lost(),
            jitter: p.source.jitter(),
            extended_highest_seq: p.source.extended_highest(),
            last_sender_report: p.last_sender_report,
        })
    }

    /// SSRCs of all current participants
    pub fn participants(&self) -> Vec<RtpSsrc> {
        self.inner.lock().participants.iter().map(|p| p.ssrc).collect()
    }

    /// Start a task that feeds inbound datagrams from the transport into
    /// [`process_compound`](Self::process_compound)
    pub fn spawn_receiver(&self) {
        let weak = Arc::downgrade(&self.inner);
        let transport = self.transport.clone();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_RTCP_PACKET];
            loop {
                let (len, from) = match transport.recv_from(&mut buf).await {
                    Ok(r) => r,
                    Err(Error::Transport(e)) => {
                        // Transient socket errors (ICMP unreachable and the
                        // like) are not fatal to the receive loop
                        debug!("RTCP receive error: {e}");
                        continue;
                    }
                    Err(e) => {
                        warn!("RTCP receiver stopping: {e}");
                        return;
                    }
                };
                let Some(inner) = weak.upgrade() else { return };
                let result = inner.lock().process_buffer(&buf[..len], &events);
                if let Err(e) = result {
                    debug!("RTCP compound from {from} reported: {e}");
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Abort and await the session's tasks
    pub async fn close(&self) {
        let handles: Vec<_> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
    }

    fn spawn_scheduler(&self) {
        let weak = Arc::downgrade(&self.inner);
        let transport = self.transport.clone();
        let events = self.events.clone();
        let handle = tokio::spawn(scheduler_loop(weak, transport, events));
        self.tasks.lock().push(handle);
    }

    async fn send_to_all(&self, buf: &[u8], addrs: &[SocketAddr]) -> Result<usize> {
        if addrs.is_empty() {
            return Err(Error::SessionError("no remote address".to_string()));
        }
        let mut sent = 0;
        for addr in addrs {
            sent = self.transport.send_to(buf, *addr).await?;
        }
        Ok(sent)
    }
}

/// Periodic report loop. Recomputes a randomized deadline from the time of
/// the previous transmission; wakeups before the deadline re-arm for the
/// remainder. Exits when the session is dropped, disarmed by zero bandwidth,
/// or done with shutdown.
async fn scheduler_loop(
    weak: Weak<Mutex<RtcpSessionInner>>,
    transport: SharedTransport,
    events: mpsc::Sender<RtcpEvent>,
) {
    loop {
        let deadline = {
            let Some(inner) = weak.upgrade() else { return };
            let mut inner = inner.lock();
            if inner.shutdown && !inner.bye_deferred {
                return;
            }
            inner.refresh_counts();
            let state = &mut *inner;
            let interval = match state
                .interval
                .compute_interval(state.we_sent > 0, &mut state.rng)
            {
                Some(interval) => interval,
                None => {
                    debug!("periodic RTCP disabled");
                    return;
                }
            };
            let prev = *state.previous_time.get_or_insert_with(Instant::now);
            prev + interval
        };

        let now = Instant::now();
        if deadline > now {
            sleep(deadline - now).await;
            // Reconsider: membership may have changed while we slept
            continue;
        }

        let (buf, addrs, finishing, reason) = {
            let Some(inner) = weak.upgrade() else { return };
            let mut inner = inner.lock();
            let finishing = inner.bye_deferred;
            let reason = inner.shutdown_reason.clone();
            let buf = if finishing {
                inner.bye_deferred = false;
                inner.build_bye(reason.clone())
            } else {
                inner.build_report()
            };
            let buf = match buf {
                Ok(buf) => buf,
                Err(e) => {
                    warn!("failed to build RTCP report: {e}");
                    inner.previous_time = Some(Instant::now());
                    continue;
                }
            };
            inner.previous_time = Some(Instant::now());
            inner.interval.update_average(buf.len());
            inner.interval.on_report_sent();
            (buf, inner.remote_addrs.clone(), finishing, reason)
        };

        for addr in &addrs {
            if let Err(e) = transport.send_to(&buf, *addr).await {
                warn!("RTCP send to {addr} failed: {e}");
            }
        }

        if finishing {
            let _ = events.try_send(RtcpEvent::ShutdownCompleted { reason });
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::rtcp::RtcpPacketType;
    use crate::transport::ChannelTransport;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn config(ssrc: RtpSsrc) -> RtcpSessionConfig {
        RtcpSessionConfig {
            cname: "test@host".to_string(),
            ssrc: Some(ssrc),
            // Periodic reports off so tests control every transmission
            bandwidth: 0,
            ..Default::default()
        }
    }

    fn open_pair(
        ssrc: RtpSsrc,
    ) -> (RtcpSession, mpsc::Receiver<RtcpEvent>, ChannelTransport) {
        let (ta, tb) = ChannelTransport::pair(addr(5001), addr(5003));
        let (session, rx) = RtcpSession::open(config(ssrc), Arc::new(ta)).unwrap();
        session.add_remote_address(addr(5003));
        (session, rx, tb)
    }

    async fn recv_compound(peer: &ChannelTransport) -> Vec<RtcpPacket> {
        use crate::transport::RtpTransport;
        let mut buf = vec![0u8; MAX_RTCP_PACKET];
        let (len, _) = peer.recv_from(&mut buf).await.unwrap();
        let mut reader = RtcpCompoundReader::new(&buf[..len]);
        let mut packets = Vec::new();
        while let Some(packet) = reader.next_packet() {
            packets.push(packet.unwrap());
        }
        packets
    }

    #[test]
    fn test_open_rejects_empty_cname() {
        let (ta, _tb) = ChannelTransport::pair(addr(5001), addr(5003));
        let result = RtcpSession::open(
            RtcpSessionConfig::default(),
            Arc::new(ta),
        );
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_first_report_is_sr_then_decays_to_rr() {
        let (session, _rx, peer) = open_pair(0xAAAA_0001);

        session.rtp_packet_sent(160, 8000).unwrap();
        session.send_report_now().await.unwrap();
        let packets = recv_compound(&peer).await;
        assert_eq!(packets[0].packet_type(), RtcpPacketType::SenderReport);
        assert_eq!(packets[1].packet_type(), RtcpPacketType::SourceDescription);

        // No RTP sent since: the sender state decays and RR goes out
        session.send_report_now().await.unwrap();
        let packets = recv_compound(&peer).await;
        assert_eq!(packets[0].packet_type(), RtcpPacketType::ReceiverReport);
    }

    #[tokio::test]
    async fn test_sr_carries_counters() {
        let (session, _rx, peer) = open_pair(0xAAAA_0002);
        session.rtp_packet_sent(160, 0).unwrap();
        session.rtp_packet_sent(160, 160).unwrap();
        session.send_report_now().await.unwrap();

        match &recv_compound(&peer).await[0] {
            RtcpPacket::SenderReport(sr) => {
                assert_eq!(sr.ssrc, 0xAAAA_0002);
                assert_eq!(sr.sender_packet_count, 2);
                assert_eq!(sr.sender_octet_count, 320);
                assert!(sr.ntp_timestamp.seconds > 0);
            }
            other => panic!("expected SR, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_report_block_for_active_source() {
        let (session, _rx, peer) = open_pair(0xAAAA_0003);

        // 10 in-order packets; probation consumes the first
        for i in 0..10u16 {
            session
                .rtp_packet_received(0xBBBB_0001, 100 + i, i as u32 * 160, i as u32 * 160)
                .unwrap();
        }

        session.send_report_now().await.unwrap();
        match &recv_compound(&peer).await[0] {
            RtcpPacket::ReceiverReport(rr) => {
                assert_eq!(rr.report_blocks.len(), 1);
                let block = &rr.report_blocks[0];
                assert_eq!(block.ssrc, 0xBBBB_0001);
                assert_eq!(block.highest_seq, 109);
                assert_eq!(block.cumulative_lost, 0);
            }
            other => panic!("expected RR, got {other:?}"),
        }

        // Inclusion cleared the active flag: next report carries no block
        session.send_report_now().await.unwrap();
        match &recv_compound(&peer).await[0] {
            RtcpPacket::ReceiverReport(rr) => assert!(rr.report_blocks.is_empty()),
            other => panic!("expected RR, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_own_ssrc_in_rtp_flags_collision() {
        let (session, _rx, _peer) = open_pair(0xAAAA_0004);
        assert!(matches!(
            session.rtp_packet_received(0xAAAA_0004, 1, 0, 0),
            Err(Error::SsrcCollision { ssrc: 0xAAAA_0004 })
        ));
        assert!(session.collision_detected());
        // The colliding packet was not inserted as a participant
        assert!(session.participants().is_empty());
    }

    #[tokio::test]
    async fn test_collision_bye_appended_once() {
        let (session, _rx, peer) = open_pair(0xAAAA_0005);
        let _ = session.rtp_packet_received(0xAAAA_0005, 1, 0, 0);

        session.send_report_now().await.unwrap();
        let packets = recv_compound(&peer).await;
        match packets.last() {
            Some(RtcpPacket::Goodbye(bye)) => {
                assert_eq!(bye.sources, vec![0xAAAA_0005]);
            }
            other => panic!("expected BYE, got {other:?}"),
        }

        // Sent once: the next compound has no BYE
        session.send_report_now().await.unwrap();
        let packets = recv_compound(&peer).await;
        assert!(!packets
            .iter()
            .any(|p| p.packet_type() == RtcpPacketType::Goodbye));
    }

    #[tokio::test]
    async fn test_inbound_sr_recorded_and_event_raised() {
        let (session, mut rx, _peer) = open_pair(0xAAAA_0006);

        let mut sr = RtcpSenderReport::new(0xCCCC_0001);
        sr.ntp_timestamp = NtpTimestamp {
            seconds: 100,
            fraction: 0,
        };
        sr.rtp_timestamp = 4242;
        let mut block = RtcpReportBlock::new(0xAAAA_0006);
        block.fraction_lost = 5;
        sr.report_blocks.push(block);

        let mut buf = BytesMut::new();
        sr.serialize(&mut buf).unwrap();
        session.process_compound(&buf).unwrap();

        let info = session.source_info(0xCCCC_0001).unwrap();
        let remote = info.last_sender_report.unwrap();
        assert_eq!(remote.rtp_timestamp, 4242);
        assert_eq!(remote.ntp.seconds, 100);

        assert_eq!(
            rx.try_recv().unwrap(),
            RtcpEvent::ReportReceived { ssrc: 0xCCCC_0001 }
        );
    }

    #[tokio::test]
    async fn test_inbound_bye_invalidates_with_reason_once() {
        let (session, mut rx, _peer) = open_pair(0xAAAA_0007);
        session.rtp_packet_received(0xDDDD_0001, 1, 0, 0).unwrap();
        session.rtp_packet_received(0xDDDD_0002, 1, 0, 0).unwrap();

        let bye = RtcpGoodbye {
            sources: vec![0xDDDD_0001, 0xDDDD_0002],
            reason: Some("done".to_string()),
        };
        let mut buf = BytesMut::new();
        bye.serialize(&mut buf).unwrap();
        session.process_compound(&buf).unwrap();

        assert!(session.participants().is_empty());
        // The reason is attached to the last listed source
        assert_eq!(
            rx.try_recv().unwrap(),
            RtcpEvent::ByeReceived {
                ssrc: 0xDDDD_0001,
                reason: None,
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            RtcpEvent::ByeReceived {
                ssrc: 0xDDDD_0002,
                reason: Some("done".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_inbound_sdes_stores_cname() {
        let (session, mut rx, _peer) = open_pair(0xAAAA_0008);

        let sdes = RtcpSdes {
            chunks: vec![SdesChunk {
                ssrc: 0xEEEE_0001,
                items: vec![
                    SdesItem::cname("eve@host"),
                    SdesItem {
                        item_type: SdesItemType::Tool,
                        value: "rtpkit".to_string(),
                    },
                ],
            }],
        };
        let mut buf = BytesMut::new();
        sdes.serialize(&mut buf).unwrap();
        session.process_compound(&buf).unwrap();

        let info = session.source_info(0xEEEE_0001).unwrap();
        assert_eq!(info.cname.as_deref(), Some("eve@host"));
        assert_eq!(
            rx.try_recv().unwrap(),
            RtcpEvent::SdesReceived {
                ssrc: 0xEEEE_0001,
                item: SdesItemType::Tool,
                value: "rtpkit".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_probationary_sources_report_no_loss() {
        let (session, _rx, _peer) = open_pair(0xAAAA_000D);

        // One RTP packet: still in probation, nothing lost
        session.rtp_packet_received(0xBBBB_0010, 500, 0, 0).unwrap();
        let info = session.source_info(0xBBBB_0010).unwrap();
        assert_eq!(info.cumulative_lost, 0);

        // A source first heard via SDES alone must not show loss either
        let sdes = RtcpSdes::with_cname(0xBBBB_0011, "ghost@host");
        let mut buf = BytesMut::new();
        sdes.serialize(&mut buf).unwrap();
        session.process_compound(&buf).unwrap();
        let info = session.source_info(0xBBBB_0011).unwrap();
        assert_eq!(info.cumulative_lost, 0);
    }

    #[tokio::test]
    async fn test_probation_packet_excluded_from_jitter() {
        let (session, _rx, _peer) = open_pair(0xAAAA_000E);

        // The probation packet arrives wildly off-schedule; it must not seed
        // the transit used by the estimate
        session
            .rtp_packet_received(0xBBBB_0020, 1, 0, 500_000)
            .unwrap();
        for i in 1..20u32 {
            session
                .rtp_packet_received(0xBBBB_0020, 1 + i as u16, i * 160, i * 160)
                .unwrap();
        }
        assert_eq!(session.source_info(0xBBBB_0020).unwrap().jitter, 0);
    }

    #[tokio::test]
    async fn test_collision_does_not_stop_rest_of_compound() {
        let (session, _rx, _peer) = open_pair(0xAAAA_000F);

        let mut buf = BytesMut::new();
        // Leading SR echoes our own SSRC, then a legitimate sender follows
        RtcpSenderReport::new(0xAAAA_000F).serialize(&mut buf).unwrap();
        RtcpSenderReport::new(0x1234_0001).serialize(&mut buf).unwrap();

        assert!(matches!(
            session.process_compound(&buf),
            Err(Error::SsrcCollision { ssrc: 0xAAAA_000F })
        ));
        assert!(session.collision_detected());
        assert!(session.source_info(0x1234_0001).is_some());
    }

    #[tokio::test]
    async fn test_shutdown_large_session_without_scheduler_sends_bye() {
        let (session, mut rx, peer) = open_pair(0xAAAA_0010);

        // Enough members for the BYE backoff, but periodic reporting is off
        // so no scheduled slot will ever come
        for i in 0..60u32 {
            session
                .rtp_packet_received(0x5000_0000 + i, 1, 0, 0)
                .unwrap();
        }

        session.shutdown(None).await.unwrap();
        let packets = recv_compound(&peer).await;
        match packets.last() {
            Some(RtcpPacket::Goodbye(bye)) => {
                assert_eq!(bye.sources, vec![0xAAAA_0010]);
            }
            other => panic!("expected BYE, got {other:?}"),
        }
        assert_eq!(
            rx.try_recv().unwrap(),
            RtcpEvent::ShutdownCompleted { reason: None }
        );
    }

    #[tokio::test]
    async fn test_malformed_tail_keeps_earlier_effects() {
        let (session, _rx, _peer) = open_pair(0xAAAA_0009);

        let mut buf = BytesMut::new();
        let sr = RtcpSenderReport::new(0xFFFF_0001);
        sr.serialize(&mut buf).unwrap();
        // Garbage second sub-packet
        buf.extend_from_slice(&[0x80, 210, 0, 0]);

        assert!(session.process_compound(&buf).is_err());
        // The SR before the garbage still registered its sender
        assert!(session.source_info(0xFFFF_0001).is_some());
    }

    #[tokio::test]
    async fn test_shutdown_small_session_sends_bye_immediately() {
        let (session, mut rx, peer) = open_pair(0xAAAA_000A);

        session.shutdown(Some("leaving".to_string())).await.unwrap();
        let packets = recv_compound(&peer).await;
        match packets.last() {
            Some(RtcpPacket::Goodbye(bye)) => {
                assert_eq!(bye.sources, vec![0xAAAA_000A]);
                assert_eq!(bye.reason.as_deref(), Some("leaving"));
            }
            other => panic!("expected BYE, got {other:?}"),
        }
        assert_eq!(
            rx.try_recv().unwrap(),
            RtcpEvent::ShutdownCompleted {
                reason: Some("leaving".to_string()),
            }
        );

        // Everything after shutdown is refused
        assert!(matches!(
            session.rtp_packet_sent(160, 0),
            Err(Error::ShutdownInProgress)
        ));
        assert!(matches!(
            session.send_report_now().await,
            Err(Error::ShutdownInProgress)
        ));
        assert!(matches!(
            session.shutdown(None).await,
            Err(Error::ShutdownInProgress)
        ));
    }

    #[tokio::test]
    async fn test_send_app_compound() {
        let (session, _rx, peer) = open_pair(0xAAAA_000B);
        session
            .send_app(3, *b"qmon", Bytes::from_static(b"12345678"))
            .await
            .unwrap();

        let packets = recv_compound(&peer).await;
        match packets.last() {
            Some(RtcpPacket::App(app)) => {
                assert_eq!(app.subtype, 3);
                assert_eq!(&app.name, b"qmon");
                assert_eq!(&app.data[..], b"12345678");
            }
            other => panic!("expected APP, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_ends_tasks() {
        let (session, _rx, _peer) = open_pair(0xAAAA_000C);
        session.spawn_receiver();
        session.close().await;
        assert!(session.tasks.lock().is_empty());
    }
}
