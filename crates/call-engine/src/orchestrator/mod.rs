//! Call orchestration: event dispatch and per-call session tasks.
//!
//! The [`Engine`] consumes the switch event stream. A channel entering
//! the application gets its own [`CallSession`] task with a private
//! inbox; every later event for that channel is routed into the inbox
//! through the [`SessionRegistry`]. Channels the engine itself created
//! (snoop and external media legs) are answered and otherwise ignored.

pub mod events;
pub mod session;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info_span, warn, Instrument};

use voxgate_speech_core::{Recognizer, Synthesizer};

use crate::config::EffectiveConfig;
use crate::database::DatabaseManager;
use crate::prompt::PromptCache;
use crate::recordings::RecordingStore;
use crate::switch::{SwitchEvent, SwitchOps};

pub use events::{SessionEvent, TimerKind};
pub use session::{CallSession, Outcome, SessionState};

/// Script-args marker identifying channels this engine created itself.
pub const INTERNAL_CHANNEL_MARKER: &str = "internal";

/// Capacity of each session's inbox.
const SESSION_INBOX_CAPACITY: usize = 256;

/// Routing state shared between the dispatcher and the sessions.
///
/// Playback events arrive keyed by playback id, not channel id, so
/// sessions register their in-flight playbacks here.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, mpsc::Sender<SessionEvent>>,
    playback_routes: DashMap<String, String>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live call sessions.
    pub fn active_calls(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn register_session(&self, channel_id: &str, inbox: mpsc::Sender<SessionEvent>) {
        self.sessions.insert(channel_id.to_string(), inbox);
    }

    pub(crate) fn remove_session(&self, channel_id: &str) {
        self.sessions.remove(channel_id);
        self.playback_routes
            .retain(|_, target| target.as_str() != channel_id);
    }

    pub(crate) fn session_inbox(&self, channel_id: &str) -> Option<mpsc::Sender<SessionEvent>> {
        self.sessions.get(channel_id).map(|entry| entry.value().clone())
    }

    pub(crate) fn register_playback(&self, playback_id: &str, channel_id: &str) {
        self.playback_routes
            .insert(playback_id.to_string(), channel_id.to_string());
    }

    pub(crate) fn remove_playback(&self, playback_id: &str) {
        self.playback_routes.remove(playback_id);
    }

    pub(crate) fn playback_target(&self, playback_id: &str) -> Option<String> {
        self.playback_routes
            .get(playback_id)
            .map(|entry| entry.value().clone())
    }
}

/// Process-wide collaborators threaded into every session.
pub struct EngineContext {
    /// Per-call configuration defaults
    pub defaults: EffectiveConfig,
    /// Temporary store for synthesized prompt chunks
    pub cache: PromptCache,
    /// Final per-call recordings
    pub recordings: RecordingStore,
    /// Interaction store
    pub database: DatabaseManager,
    /// Text-to-speech adapter
    pub synthesizer: Synthesizer,
    /// Speech-to-text adapter
    pub recognizer: Recognizer,
}

/// Dispatches switch events to per-call session tasks.
pub struct Engine {
    ops: Arc<dyn SwitchOps>,
    registry: Arc<SessionRegistry>,
    context: Arc<EngineContext>,
}

impl Engine {
    /// Create an engine over a connected switch client.
    pub fn new(ops: Arc<dyn SwitchOps>, context: Arc<EngineContext>) -> Self {
        Self {
            ops,
            registry: Arc::new(SessionRegistry::new()),
            context,
        }
    }

    /// Shared routing state, mainly for observability.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Consume the switch event stream until it closes.
    pub async fn run(&self, mut events: mpsc::Receiver<SwitchEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event).await;
        }
        warn!("switch event stream ended");
    }

    /// Route one switch event.
    pub async fn dispatch(&self, event: SwitchEvent) {
        match event {
            SwitchEvent::ChannelEnter { channel, args } => {
                if args.first().map(String::as_str) == Some(INTERNAL_CHANNEL_MARKER) {
                    // Our own snoop or external media leg: acknowledge
                    // it and leave it alone.
                    debug!(channel_id = %channel.id, "internal channel entered");
                    if let Err(e) = self.ops.answer(&channel.id).await {
                        warn!(channel_id = %channel.id, error = %e, "failed to answer internal channel");
                    }
                    return;
                }

                let (inbox_tx, inbox_rx) = mpsc::channel(SESSION_INBOX_CAPACITY);
                self.registry.register_session(&channel.id, inbox_tx.clone());
                let span = info_span!(
                    "call",
                    unique_id = %channel.id,
                    caller_id = %channel.caller_number
                );
                let session = CallSession::new(
                    channel,
                    self.ops.clone(),
                    self.context.clone(),
                    self.registry.clone(),
                    inbox_tx,
                );
                tokio::spawn(session.run(inbox_rx).instrument(span));
            }

            SwitchEvent::PlaybackFinished { ref playback_id }
            | SwitchEvent::PlaybackFailed { ref playback_id } => {
                match self.registry.playback_target(playback_id) {
                    Some(channel_id) => self.route(&channel_id, event).await,
                    None => debug!(playback_id, "playback event with no owning session"),
                }
            }

            SwitchEvent::ChannelExit { ref channel_id }
            | SwitchEvent::VoiceStart { ref channel_id }
            | SwitchEvent::VoiceEnd { ref channel_id, .. }
            | SwitchEvent::DtmfDigit { ref channel_id, .. } => {
                let channel_id = channel_id.clone();
                self.route(&channel_id, event).await;
            }
        }
    }

    async fn route(&self, channel_id: &str, event: SwitchEvent) {
        match self.registry.session_inbox(channel_id) {
            Some(inbox) => {
                if inbox.send(SessionEvent::Switch(event)).await.is_err() {
                    debug!(channel_id, "session inbox closed");
                }
            }
            None => debug!(channel_id, "event for unknown channel"),
        }
    }
}
