//! # rtpkit-rtp-core
//!
//! RTP packet encoding/decoding and an RFC 3550 RTCP session engine:
//! compound packet codec (SR/RR/SDES/BYE/APP), per-source sequence, jitter
//! and loss statistics (RFC 3550 Appendix A.8), the randomized
//! transmission-interval scheduler (RFC 3550 Section 6.3), and the
//! participant table with collision and BYE handling.
//!
//! Transport, encryption and event delivery are injected abstractions; see
//! [`transport`], [`crypto`] and [`events`].

pub mod crypto;
pub mod error;
pub mod events;
pub mod packet;
pub mod payload;
pub mod session;
pub mod transport;

pub use error::{Error, Result};

pub use packet::rtcp::{
    NtpTimestamp, RtcpApp, RtcpCompoundReader, RtcpGoodbye, RtcpHeader, RtcpPacket,
    RtcpPacketType, RtcpReceiverReport, RtcpReportBlock, RtcpSdes, RtcpSenderReport, SdesChunk,
    SdesItem, SdesItemType,
};
pub use packet::{RtpHeader, RtpPacket};

pub use events::RtcpEvent;
pub use session::participant::{Participant, ParticipantTable, RemoteSenderReport};
pub use session::rtp::{RtpSession, RtpSessionConfig};
pub use session::source::RtpSource;
pub use session::{RtcpSession, RtcpSessionConfig, SourceInfo};
pub use transport::{RtpTransport, UdpRtpTransport};

/// RTP synchronization source identifier
pub type RtpSsrc = u32;

/// RTP sequence number (16 bits on the wire)
pub type RtpSequenceNumber = u16;

/// RTP timestamp in media clock units
pub type RtpTimestamp = u32;

/// RTP contributing source identifier
pub type RtpCsrc = u32;

/// Maximum size of an RTCP compound packet we will build or accept
pub const MAX_RTCP_PACKET: usize = 1472;

/// Maximum length of a single RTCP packet body accepted by the parser
pub const MAX_RTCP_PACKET_BODY: usize = 1400;

/// UDP/IP overhead added to RTCP packet sizes for bandwidth accounting
pub const RTCP_PACKET_OVERHEAD: u32 = 28;
