//! Error types for the RTP receive path.

use thiserror::Error;

/// Result type alias for RTP operations
pub type Result<T> = std::result::Result<T, RtpError>;

/// Errors surfaced by the receiver
#[derive(Error, Debug)]
pub enum RtpError {
    /// Every candidate port in the probe range was already taken
    #[error("No free UDP port: probed {attempts} ports starting at {start_port}")]
    BindExhausted { start_port: u16, attempts: u16 },

    /// The socket failed outside of the address-in-use probe path
    #[error("UDP socket error: {source}")]
    Socket {
        #[from]
        source: std::io::Error,
    },

    /// Datagram shorter than the fixed 12-byte RTP header
    #[error("RTP packet too short: {len} bytes")]
    PacketTooShort { len: usize },

    /// The receiver task is no longer running
    #[error("RTP receiver is closed")]
    Closed,
}
