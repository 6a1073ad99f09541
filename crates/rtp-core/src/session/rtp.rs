//! RTP send/receive path
//!
//! An [`RtpSession`] packs and unpacks media packets over an injected
//! transport, keeps the outgoing sequence number (with a rollover count at
//! each 16-bit wrap), and keeps the paired [`RtcpSession`] informed of every
//! packet in both directions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::crypto::{EncryptionPlugin, NullEncryption};
use crate::error::Error;
use crate::packet::{RtpHeader, RtpPacket};
use crate::session::RtcpSession;
use crate::{Result, RtpSsrc};

/// Configuration for an RTP session
#[derive(Debug, Clone)]
pub struct RtpSessionConfig {
    /// Payload type stamped on outgoing packets
    pub payload_type: u8,

    /// Our SSRC; generated randomly when `None`
    pub ssrc: Option<RtpSsrc>,

    /// First outgoing sequence number; random when `None`
    pub initial_sequence: Option<u16>,

    /// Media clock rate, used to express packet arrival times in timestamp
    /// units for the jitter estimate
    pub clock_rate: u32,
}

impl Default for RtpSessionConfig {
    fn default() -> Self {
        Self {
            payload_type: 0,
            ssrc: None,
            initial_sequence: None,
            clock_rate: 8000,
        }
    }
}

struct RtpSessionState {
    ssrc: RtpSsrc,
    sequence: u16,
    rollover_count: u32,
    payload_type: u8,
    remote_addrs: Vec<SocketAddr>,
    rng: SmallRng,
}

/// An RTP endpoint over an injected transport
pub struct RtpSession {
    state: Mutex<RtpSessionState>,
    transport: Arc<dyn crate::transport::RtpTransport>,
    rtcp: Option<RtcpSession>,
    encryption: Arc<dyn EncryptionPlugin>,
    clock_rate: u32,
    started: Instant,
}

impl RtpSession {
    /// Create a session; `rtcp` links it to the RTCP engine that will report
    /// on its traffic
    pub fn new(
        config: RtpSessionConfig,
        transport: Arc<dyn crate::transport::RtpTransport>,
        rtcp: Option<RtcpSession>,
        encryption: Option<Arc<dyn EncryptionPlugin>>,
    ) -> Self {
        let mut rng = SmallRng::from_entropy();
        let ssrc = config
            .ssrc
            .or_else(|| rtcp.as_ref().map(|r| r.ssrc()))
            .unwrap_or_else(|| rng.gen());
        let sequence = config.initial_sequence.unwrap_or_else(|| rng.gen());

        if let Some(rtcp) = &rtcp {
            rtcp.set_payload_type(config.payload_type);
        }

        Self {
            state: Mutex::new(RtpSessionState {
                ssrc,
                sequence,
                rollover_count: 0,
                payload_type: config.payload_type,
                remote_addrs: Vec::new(),
                rng,
            }),
            transport,
            rtcp,
            encryption: encryption.unwrap_or_else(|| Arc::new(NullEncryption)),
            clock_rate: config.clock_rate.max(1),
            started: Instant::now(),
        }
    }

    /// Our SSRC
    pub fn ssrc(&self) -> RtpSsrc {
        self.state.lock().ssrc
    }

    /// Next outgoing sequence number
    pub fn sequence(&self) -> u16 {
        self.state.lock().sequence
    }

    /// Times the outgoing sequence number has wrapped
    pub fn rollover_count(&self) -> u32 {
        self.state.lock().rollover_count
    }

    /// Pick a fresh random SSRC after a collision and propagate it to RTCP
    pub fn regenerate_ssrc(&self) -> RtpSsrc {
        let ssrc = {
            let mut state = self.state.lock();
            state.ssrc = state.rng.gen();
            state.ssrc
        };
        if let Some(rtcp) = &self.rtcp {
            rtcp.set_ssrc(ssrc);
        }
        debug!(ssrc, "regenerated SSRC");
        ssrc
    }

    /// Add a destination; every write fans out to all of them
    pub fn add_remote_address(&self, addr: SocketAddr) {
        self.state.lock().remote_addrs.push(addr);
    }

    /// Remove a destination
    pub fn remove_remote_address(&self, addr: SocketAddr) {
        self.state.lock().remote_addrs.retain(|a| *a != addr);
    }

    /// Send one payload, stamping the next sequence number. Returns bytes
    /// sent to the last destination.
    pub async fn write(&self, payload: &[u8], timestamp: u32, marker: bool) -> Result<usize> {
        let seq = {
            let mut state = self.state.lock();
            let seq = state.sequence;
            state.sequence = state.sequence.wrapping_add(1);
            if state.sequence == 0 {
                state.rollover_count += 1;
            }
            seq
        };
        self.write_with_sequence(payload, timestamp, marker, seq).await
    }

    /// Send one payload with a caller-chosen sequence number
    pub async fn write_with_sequence(
        &self,
        payload: &[u8],
        timestamp: u32,
        marker: bool,
        sequence: u16,
    ) -> Result<usize> {
        let (packet, addrs) = {
            let state = self.state.lock();
            let mut header =
                RtpHeader::new(state.payload_type, sequence, timestamp, state.ssrc);
            header.marker = marker;
            (
                RtpPacket::new(header, Bytes::copy_from_slice(payload)),
                state.remote_addrs.clone(),
            )
        };
        if addrs.is_empty() {
            return Err(Error::SessionError("no remote address".to_string()));
        }

        let plain = packet.serialize()?;
        let mut work = vec![0u8; plain.len() + 64];
        let wire_len = self.encryption.encrypt(&plain, &mut work)?;

        let mut sent = 0;
        for addr in &addrs {
            sent = self.transport.send_to(&work[..wire_len], *addr).await?;
        }

        if let Some(rtcp) = &self.rtcp {
            rtcp.rtp_packet_sent(payload.len(), timestamp)?;
        }
        Ok(sent)
    }

    /// Receive and unpack one packet, feeding its statistics to RTCP.
    ///
    /// Transient socket errors surface as [`Error::Transport`]; callers on
    /// lossy paths treat those as benign and read again.
    pub async fn read(&self) -> Result<(RtpPacket, SocketAddr)> {
        let mut wire = vec![0u8; 2048];
        let (len, from) = self.transport.recv_from(&mut wire).await?;

        let mut plain = vec![0u8; len + 64];
        let plain_len = self.encryption.decrypt(&wire[..len], &mut plain)?;

        let packet = RtpPacket::parse(&plain[..plain_len])?;

        if let Some(rtcp) = &self.rtcp {
            let elapsed = self.started.elapsed();
            let arrival =
                (elapsed.as_secs_f64() * self.clock_rate as f64) as u64 as u32;
            rtcp.rtp_packet_received(
                packet.header.ssrc,
                packet.header.sequence_number,
                packet.header.timestamp,
                arrival,
            )?;
        }

        Ok((packet, from))
    }
}
