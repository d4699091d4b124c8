//! Canonical RIFF/WAVE framing for PCM buffers.
//!
//! Prompt artifacts handed to the switch and the per-call recordings are
//! plain PCM wrapped in the fixed 44-byte WAV header. Nothing fancier is
//! needed: one `fmt ` chunk, one `data` chunk, little-endian fields.

use crate::error::{CodecError, Result};

/// Total size of the canonical PCM WAV header.
pub const HEADER_LEN: usize = 44;

/// Declared shape of a PCM buffer being framed.
///
/// Callers are responsible for the buffer actually matching the declared
/// parameters; the framer trusts what it is told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    /// Number of interleaved channels
    pub channels: u16,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Bits per sample (16 for everything this gateway produces)
    pub bits_per_sample: u16,
}

impl WavSpec {
    /// Bytes per sample frame across all channels.
    pub fn block_align(&self) -> u16 {
        self.channels * self.bits_per_sample / 8
    }

    /// Bytes per second of audio.
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }
}

/// The only format the gateway ever writes: 8 kHz, 16-bit, mono.
pub const TELEPHONY_SPEC: WavSpec = WavSpec {
    channels: 1,
    sample_rate: 8000,
    bits_per_sample: 16,
};

/// Prepend a canonical 44-byte WAV header to `pcm`.
pub fn wrap(pcm: &[u8], spec: WavSpec) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let mut out = Vec::with_capacity(HEADER_LEN + pcm.len());

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM format tag
    out.extend_from_slice(&spec.channels.to_le_bytes());
    out.extend_from_slice(&spec.sample_rate.to_le_bytes());
    out.extend_from_slice(&spec.byte_rate().to_le_bytes());
    out.extend_from_slice(&spec.block_align().to_le_bytes());
    out.extend_from_slice(&spec.bits_per_sample.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);

    out
}

/// Parse a buffer produced by [`wrap`], returning the declared spec and
/// the PCM payload.
pub fn parse(bytes: &[u8]) -> Result<(WavSpec, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::truncated(HEADER_LEN, bytes.len()));
    }
    if &bytes[0..4] != b"RIFF" {
        return Err(CodecError::invalid_marker(0, "RIFF"));
    }
    if &bytes[8..12] != b"WAVE" {
        return Err(CodecError::invalid_marker(8, "WAVE"));
    }
    if &bytes[12..16] != b"fmt " {
        return Err(CodecError::invalid_marker(12, "fmt "));
    }
    if &bytes[36..40] != b"data" {
        return Err(CodecError::invalid_marker(36, "data"));
    }

    let format_tag = u16::from_le_bytes([bytes[20], bytes[21]]);
    if format_tag != 1 {
        return Err(CodecError::UnsupportedFormat { format_tag });
    }

    let spec = WavSpec {
        channels: u16::from_le_bytes([bytes[22], bytes[23]]),
        sample_rate: u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]),
        bits_per_sample: u16::from_le_bytes([bytes[34], bytes[35]]),
    };

    let declared = u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]) as usize;
    let data = &bytes[HEADER_LEN..];
    if declared != data.len() {
        return Err(CodecError::DataLengthMismatch {
            declared,
            actual: data.len(),
        });
    }

    Ok((spec, data))
}
