//! Event delivery from the RTCP engine to the application
//!
//! Events are pushed over a bounded `tokio::sync::mpsc` channel handed out at
//! session open. Delivery is best-effort: a full channel drops the event
//! rather than stall packet processing.

use bytes::Bytes;

use crate::packet::rtcp::SdesItemType;
use crate::RtpSsrc;

/// Notifications surfaced while processing inbound RTCP and during shutdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpEvent {
    /// An SR or RR from `ssrc` was processed into the participant table
    ReportReceived {
        /// Reporting source
        ssrc: RtpSsrc,
    },

    /// An SDES item other than CNAME arrived (CNAME is stored, not surfaced)
    SdesReceived {
        /// Described source
        ssrc: RtpSsrc,
        /// Item type
        item: SdesItemType,
        /// Item text
        value: String,
    },

    /// A BYE removed `ssrc` from the session
    ByeReceived {
        /// Departing source
        ssrc: RtpSsrc,
        /// Reason text, delivered once per BYE packet with its last source
        reason: Option<String>,
    },

    /// An application-defined packet arrived
    AppReceived {
        /// Sending source
        ssrc: RtpSsrc,
        /// Application subtype
        subtype: u8,
        /// Four-character application name
        name: [u8; 4],
        /// Raw application payload
        data: Bytes,
    },

    /// The shutdown BYE went out; the session sends nothing further
    ShutdownCompleted {
        /// Reason the BYE carried
        reason: Option<String>,
    },
}
