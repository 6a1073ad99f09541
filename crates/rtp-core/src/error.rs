//! Error handling for the RTP/RTCP stack
//!
//! All library entry points return [`Result`]; none of the failures here are
//! process-fatal. Parse failures abort the current packet only, and resource
//! failures leave existing session state untouched.

use std::io;
use thiserror::Error;

/// Result type alias for RTP/RTCP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for RTP/RTCP operations
#[derive(Error, Debug)]
pub enum Error {
    /// Buffer too small for the requested operation
    #[error("Buffer too small: need {required} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required to proceed
        required: usize,
        /// Bytes actually available
        available: usize,
    },

    /// RTP packet shorter than the fixed 12-byte header
    #[error("RTP packet too short: {size} bytes")]
    PacketTooShort {
        /// Total packet size seen
        size: usize,
    },

    /// RTP version field is not 2
    #[error("Unsupported RTP version: {version}")]
    VersionMismatch {
        /// Version found in the packet
        version: u8,
    },

    /// Malformed RTCP packet inside a compound buffer: bad type, bad declared
    /// length, or a length that overruns the remaining buffer
    #[error("Illegal RTCP packet: {0}")]
    IllegalPacket(&'static str),

    /// RTP header extension claims more data than the packet holds
    #[error("RTP header extension overruns packet ({claimed} > {packet_len})")]
    ExtensionOverrun {
        /// Offset the extension claims to end at
        claimed: usize,
        /// Total packet length
        packet_len: usize,
    },

    /// Participant table is full and no invalidated slot can be recycled
    #[error("Out of resources: participant table full")]
    OutOfResources,

    /// A remote source is using our SSRC (or we observed ours coming back)
    #[error("SSRC collision detected on {ssrc:#010x}")]
    SsrcCollision {
        /// The colliding SSRC value
        ssrc: u32,
    },

    /// The session sent its BYE (or is waiting to); no further traffic allowed
    #[error("Session is shutting down")]
    ShutdownInProgress,

    /// Invalid configuration value (empty CNAME, oversized SDES item, ...)
    #[error("Invalid configuration: {details}")]
    InvalidConfig {
        /// Human-readable description of the rejected value
        details: String,
    },

    /// Invalid SDES item type value
    #[error("Invalid SDES item type: {value}")]
    InvalidSdesType {
        /// The raw item type byte
        value: u8,
    },

    /// Session-level failure (scheduler not armed, no remote address, ...)
    #[error("Session error: {0}")]
    SessionError(String),

    /// Error propagated unchanged from the injected transport
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),
}
