//! Circular pre-buffer for audio leading up to a voice decision.
//!
//! Voice activity detection fires a moment after the caller actually
//! started talking. The receiver therefore keeps the most recent frames
//! in a fixed-size ring; when the decision lands, the ring is flushed
//! into the recognizer ahead of the live stream so the first syllable is
//! not clipped.

use std::collections::VecDeque;

/// Fixed-capacity ring of reordered frames, oldest evicted first.
#[derive(Debug)]
pub struct PreBuffer {
    frames: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl PreBuffer {
    /// Create a ring holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest when the ring is full.
    pub fn push(&mut self, frame: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Concatenate the buffered frames in arrival order and clear the ring.
    pub fn flush(&mut self) -> Vec<u8> {
        let total: usize = self.frames.iter().map(|f| f.len()).sum();
        let mut out = Vec::with_capacity(total);
        for frame in self.frames.drain(..) {
            out.extend_from_slice(&frame);
        }
        out
    }

    /// Number of frames currently held.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when the ring holds nothing.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
