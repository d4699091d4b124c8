//! Sequence-ordered jitter buffer with bounded loss tolerance.
//!
//! Packets are keyed by their 16-bit RTP sequence number. The buffer only
//! releases the exact next sequence; when that packet never arrives it
//! tolerates a fixed number of missed playout ticks and then jumps to the
//! nearest buffered sequence, treating sequence space as circular so that
//! wrap-around at 65535 is ordinary arithmetic.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::{MAX_BUFFERED_PACKETS, MAX_MISSES};

/// Reordering buffer driven by an external playout tick.
#[derive(Debug)]
pub struct JitterBuffer {
    /// Buffered payloads keyed by sequence number
    packets: BTreeMap<u16, Vec<u8>>,

    /// Sequence most recently released, None until the first insert
    last_played: Option<u16>,

    /// Consecutive ticks where the next sequence was absent
    miss_count: u32,

    /// Cap on `packets` before new arrivals are dropped
    max_packets: usize,
}

impl Default for JitterBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl JitterBuffer {
    /// Create an empty buffer with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(MAX_BUFFERED_PACKETS)
    }

    /// Create an empty buffer holding at most `max_packets` entries.
    pub fn with_capacity(max_packets: usize) -> Self {
        Self {
            packets: BTreeMap::new(),
            last_played: None,
            miss_count: 0,
            max_packets,
        }
    }

    /// Insert one payload under its sequence number.
    ///
    /// Returns true when this was the very first packet seen, which is
    /// the receiver's cue to start the playout tick.
    pub fn insert(&mut self, sequence: u16, payload: Vec<u8>) -> bool {
        if self.packets.len() >= self.max_packets {
            warn!(sequence, buffered = self.packets.len(), "jitter buffer full, dropping packet");
            return false;
        }

        let first = self.last_played.is_none();
        if first {
            self.last_played = Some(sequence.wrapping_sub(1));
        }
        self.packets.insert(sequence, payload);
        first
    }

    /// Advance one playout tick.
    ///
    /// Releases the next-in-sequence payload when it is buffered.
    /// Otherwise counts a miss; once the miss budget is exhausted the
    /// buffer jumps to the buffered sequence closest ahead of the gap
    /// and resumes from there on the following tick. An empty buffer is
    /// a no-op and does not consume the miss budget.
    pub fn advance(&mut self) -> Option<Vec<u8>> {
        if self.packets.is_empty() {
            return None;
        }

        let next = self.last_played?.wrapping_add(1);
        if let Some(payload) = self.packets.remove(&next) {
            self.last_played = Some(next);
            self.miss_count = 0;
            return Some(payload);
        }

        self.miss_count += 1;
        if self.miss_count > MAX_MISSES {
            // Forward modular distance picks the oldest buffered packet
            // even across the 16-bit wrap.
            let nearest = self
                .packets
                .keys()
                .copied()
                .min_by_key(|seq| seq.wrapping_sub(next))?;
            warn!(
                expected = next,
                resumed_at = nearest,
                "missing RTP packets, skipping ahead"
            );
            self.last_played = Some(nearest.wrapping_sub(1));
            self.miss_count = 0;
        } else {
            debug!(expected = next, miss = self.miss_count, "awaiting RTP packet");
        }
        None
    }

    /// Number of payloads currently buffered.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}
