//! RTP receive path for the voxgate voice gateway.
//!
//! The switch mirrors caller audio to us over a UDP side-channel as plain
//! RTP. This crate owns that path end to end: binding a local port
//! (probing upward when the first choice is taken), parsing the fixed
//! 12-byte RTP header, reordering packets by sequence number with a
//! bounded tolerance for loss, and handing reordered payloads either to a
//! circular pre-buffer or to a live subscriber.
//!
//! The receiver runs as a single tokio task per call. Consumers never
//! touch its internals; they hold an [`RtpReceiverHandle`] for commands
//! and read typed [`RtpEvent`]s from a channel. Lost packets are skipped
//! after a fixed number of missed playout ticks, never retransmitted.

mod error;
mod events;
mod jitter;
mod packet;
mod prebuffer;
mod receiver;

pub use error::{Result, RtpError};
pub use events::RtpEvent;
pub use jitter::JitterBuffer;
pub use packet::RtpPacket;
pub use prebuffer::PreBuffer;
pub use receiver::{RtpReceiver, RtpReceiverHandle};

use std::time::Duration;

/// Fixed RTP header length assumed on the wire.
pub const RTP_HEADER_LEN: usize = 12;

/// Playout tick; one frame of the negotiated format per packet.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(20);

/// Consecutive missed ticks tolerated before skipping ahead.
pub const MAX_MISSES: u32 = 5;

/// Upper bound on packets held while waiting for a gap to fill.
pub const MAX_BUFFERED_PACKETS: usize = 512;

/// How many consecutive ports to probe before giving up on a bind.
pub const MAX_PORT_PROBES: u16 = 100;
