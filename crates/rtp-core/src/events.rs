//! Typed events published by the RTP receiver.

use std::net::SocketAddr;

/// Everything a consumer can observe from an [`crate::RtpReceiver`].
///
/// The variants are deliberately few so that session state machines can
/// match exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtpEvent {
    /// The socket is bound and the receive loop is running.
    Listening {
        /// Endpoint the switch should point its external media at
        local_addr: SocketAddr,
    },

    /// One reordered frame, delivered in live mode only.
    Frame {
        /// Raw payload in the negotiated wire format (µ-law by default)
        payload: Vec<u8>,
    },

    /// The socket failed; the receiver has shut down.
    SocketError {
        /// Stringified I/O error, the socket is already closed
        reason: String,
    },
}
