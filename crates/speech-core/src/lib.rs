//! Speech recognition and synthesis adapters for the voxgate voice
//! gateway.
//!
//! The call orchestrator needs two things from a cloud speech provider:
//! a push-stream recognizer it can feed PCM frames into, and a
//! synthesizer that turns prompt text into a lazy sequence of PCM
//! chunks. Both are expressed here as thin adapters over provider
//! backends ([`RecognizerBackend`], [`SynthesizerBackend`]) so the
//! orchestrator never sees a provider SDK or wire protocol.
//!
//! The adapters normalize provider behavior into small typed event sets:
//! a recognizer session emits [`RecognizerEvent`]s ending in exactly one
//! terminal `Ended`, and a synthesis run emits [`SynthesisEvent`]s
//! ending in `End` or `Error`. The Azure Speech implementations live in
//! [`azure`].

pub mod azure;
mod error;
mod events;
mod recognizer;
mod synthesis;

pub use error::{Result, SpeechError};
pub use events::{ProviderEvent, RecognizerEvent, SynthesisEvent};
pub use recognizer::{ProviderSession, Recognizer, RecognizerBackend, RecognizerSession};
pub use synthesis::{Synthesizer, SynthesizerBackend};
