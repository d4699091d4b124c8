//! Audio codec primitives for the voxgate voice gateway.
//!
//! The telephony leg of a call delivers G.711 audio, while the speech
//! provider and the on-disk recordings want 16-bit linear PCM. This crate
//! owns that boundary: the µ-law expansion tables, bulk payload
//! conversion, and the canonical RIFF/WAVE framing used everywhere a PCM
//! buffer has to become a playable file.
//!
//! Everything here is pure and allocation-bounded. Socket handling and
//! packet ordering live in `voxgate-rtp-core`; this crate never sees a
//! network.

mod error;
pub mod g711;
pub mod wav;

pub use error::{CodecError, Result};
pub use g711::{decode_ulaw, ulaw_to_pcm};
pub use wav::{WavSpec, TELEPHONY_SPEC};

/// Telephony sample rate in Hz. G.711 is always narrowband.
pub const SAMPLE_RATE: u32 = 8000;

/// Samples per 20 ms frame at the telephony rate.
pub const SAMPLES_PER_FRAME: usize = 160;
