//! # voxgate call engine
//!
//! The per-call orchestration layer of the voxgate voice gateway. The
//! switch (an Asterisk-style engine driven over ARI) hands inbound
//! channels to this engine; for each one it answers the call, builds an
//! audio-snooping topology, plays a synthesized or pre-recorded prompt,
//! listens for the caller's spoken or keypad response with barge-in,
//! couples caller audio into a streaming recognizer, and writes the
//! outcome back to the switch so the call script can continue.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Engine                       │
//! │  dispatches SwitchEvents to per-call tasks   │
//! ├──────────────────────────────────────────────┤
//! │   CallSession (one task, one inbox)          │
//! │   state machine + timers + prompt queue      │
//! ├──────────────┬───────────────┬───────────────┤
//! │ SwitchOps    │ RtpReceiver   │ speech-core   │
//! │ (ARI client) │ (jitter/ring) │ (STT / TTS)   │
//! └──────────────┴───────────────┴───────────────┘
//! ```
//!
//! Every call-control action inside a session is guarded: failures are
//! logged and swallowed so that teardown always runs, exactly once, on
//! every exit path.

pub mod config;
pub mod database;
pub mod error;
pub mod orchestrator;
pub mod prompt;
pub mod recordings;
pub mod server;
pub mod switch;

pub use config::{EffectiveConfig, ProcessConfig, PromptMode, VadActivationMode};
pub use error::{EngineError, Result};
pub use orchestrator::{Engine, EngineContext, SessionRegistry};
pub use server::Server;
