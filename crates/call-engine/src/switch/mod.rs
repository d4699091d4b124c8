//! Call-control contract with the telephony switch.
//!
//! The engine talks to the switch exclusively through the [`SwitchOps`]
//! trait and observes it through [`SwitchEvent`]s. The production
//! implementation is the ARI client in [`ari`]; tests substitute an
//! in-memory switch.

pub mod ari;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

pub use ari::AriClient;

/// Result type alias for switch operations
pub type SwitchResult<T> = std::result::Result<T, SwitchError>;

/// Errors from call-control operations
#[derive(Error, Debug)]
pub enum SwitchError {
    /// Transport-level failure reaching the switch
    #[error("Switch transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The switch rejected an operation
    #[error("Switch rejected {operation}: {status}")]
    Rejected { operation: String, status: u16 },

    /// The event WebSocket could not be established or died
    #[error("Switch event stream error: {reason}")]
    EventStream { reason: String },

    /// A response was missing an expected field
    #[error("Malformed switch response: {reason}")]
    Malformed { reason: String },
}

impl SwitchError {
    /// Create a rejected-operation error
    pub fn rejected(operation: impl Into<String>, status: u16) -> Self {
        Self::Rejected {
            operation: operation.into(),
            status,
        }
    }

    /// Create an event stream error
    pub fn event_stream(reason: impl Into<String>) -> Self {
        Self::EventStream {
            reason: reason.into(),
        }
    }

    /// Create a malformed response error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

/// Identity of a channel as reported by the switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Switch-assigned channel id, unique per call leg
    pub id: String,

    /// Caller number, empty when withheld
    pub caller_number: String,
}

/// Events the switch delivers about channels owned by this application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchEvent {
    /// A channel entered the application, with its script arguments.
    ChannelEnter {
        channel: ChannelInfo,
        args: Vec<String>,
    },

    /// A channel left the application (hangup or script continuation).
    ChannelExit { channel_id: String },

    /// The talk-detect function decided the caller started speaking.
    VoiceStart { channel_id: String },

    /// The talk-detect function decided the caller stopped speaking.
    VoiceEnd {
        channel_id: String,
        duration_ms: Option<u64>,
    },

    /// The caller pressed a keypad digit.
    DtmfDigit { channel_id: String, digit: char },

    /// A playback operation completed.
    PlaybackFinished { playback_id: String },

    /// A playback operation failed.
    PlaybackFailed { playback_id: String },
}

/// Call-control operations the engine invokes on the switch.
///
/// Every method is best-effort from the orchestrator's point of view:
/// callers log and swallow errors on the teardown path so cleanup never
/// stops halfway.
#[async_trait]
pub trait SwitchOps: Send + Sync {
    /// Answer an inbound channel.
    async fn answer(&self, channel_id: &str) -> SwitchResult<()>;

    /// Read one channel variable; `Ok(None)` when it is unset.
    async fn get_variable(&self, channel_id: &str, name: &str) -> SwitchResult<Option<String>>;

    /// Read all script-visible variables at once.
    ///
    /// Not every switch exposes a bulk getter; callers fall back to
    /// per-name [`get_variable`](Self::get_variable) calls on error.
    async fn get_all_variables(&self, channel_id: &str) -> SwitchResult<HashMap<String, String>>;

    /// Set one channel variable.
    async fn set_variable(&self, channel_id: &str, name: &str, value: &str) -> SwitchResult<()>;

    /// Hang the channel up.
    async fn hangup(&self, channel_id: &str) -> SwitchResult<()>;

    /// Return the channel to the script at the next priority.
    async fn continue_script(&self, channel_id: &str) -> SwitchResult<()>;

    /// Create a mixing bridge, returning its id.
    async fn create_mixing_bridge(&self) -> SwitchResult<String>;

    /// Add a channel to a bridge.
    async fn add_to_bridge(&self, bridge_id: &str, channel_id: &str) -> SwitchResult<()>;

    /// Destroy a bridge.
    async fn destroy_bridge(&self, bridge_id: &str) -> SwitchResult<()>;

    /// Create a snoop channel on `channel_id`, returning the snoop
    /// channel id. `spy` selects the direction ("in" for caller audio);
    /// `app_args` are delivered with the snoop channel's enter event.
    async fn snoop_channel(
        &self,
        channel_id: &str,
        spy: &str,
        app_args: &str,
    ) -> SwitchResult<String>;

    /// Create an external media channel whose far end is `host:port`,
    /// returning the channel id.
    async fn external_media(
        &self,
        host: &str,
        port: u16,
        format: &str,
        app_args: &str,
    ) -> SwitchResult<String>;

    /// Start playing a media URI on a bridge, returning the playback id.
    async fn play_on_bridge(&self, bridge_id: &str, media_uri: &str) -> SwitchResult<String>;

    /// Stop an in-flight playback by id.
    async fn stop_playback(&self, playback_id: &str) -> SwitchResult<()>;
}
