//! Per-call state machine.
//!
//! One `CallSession` runs as one tokio task and is the sole writer of
//! its own state. Everything that happens to the call arrives through
//! the inbox: switch events, RTP frames, recognizer callbacks,
//! synthesis chunks and timer expiries. Every call-control action is
//! guarded; failures on the teardown path are logged and swallowed so
//! cleanup always completes.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use voxgate_codec_core::g711::ulaw_to_pcm;
use voxgate_rtp_core::{RtpEvent, RtpReceiver, RtpReceiverHandle};
use voxgate_speech_core::{RecognizerEvent, RecognizerSession, SynthesisEvent};

use crate::config::{EffectiveConfig, PromptMode, VadActivationMode, SCRIPT_VAR_ALLOW_LIST};
use crate::database::InteractionRecord;
use crate::error::{EngineError, Result};
use crate::orchestrator::events::{SessionEvent, TimerKind};
use crate::orchestrator::{EngineContext, SessionRegistry, INTERNAL_CHANNEL_MARKER};
use crate::prompt::PromptArtifact;
use crate::recordings::RecordingKind;
use crate::switch::{ChannelInfo, SwitchEvent, SwitchOps};

/// Lifecycle states of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Answering,
    PlayingPrompt,
    Listening,
    Recognizing,
    Finalizing,
    Terminated,
}

/// Which input path currently owns the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Voice,
    Keypad,
}

/// Typed end result of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Voice { transcript: String },
    Keypad,
    NoInput,
    Timeout,
    Error,
}

impl Outcome {
    /// The RECOGNITION_MODE value written back to the script and
    /// persisted with the interaction row.
    pub fn mode_tag(&self) -> &'static str {
        match self {
            Self::Voice { .. } => "VOICE",
            Self::Keypad => "DTMF",
            Self::NoInput => "NO_INPUT",
            Self::Timeout => "TIMEOUT",
            Self::Error => "ERROR",
        }
    }
}

/// Handles of the audio-snooping topology, filled progressively so a
/// half-built topology still tears down what exists.
#[derive(Debug, Default)]
struct MediaTopology {
    user_bridge: Option<String>,
    snoop_channel: Option<String>,
    external_media_channel: Option<String>,
    snoop_bridge: Option<String>,
    rtp: Option<RtpReceiverHandle>,
}

/// An in-flight playback on the user bridge.
#[derive(Debug)]
struct ActivePlayback {
    id: String,
    /// None for the pre-recorded file in playback prompt mode
    artifact: Option<PromptArtifact>,
}

/// Prompt pipeline state.
#[derive(Debug, Default)]
struct PromptPlayback {
    queue: VecDeque<PromptArtifact>,
    active: Option<ActivePlayback>,
    /// No more chunks will arrive
    synthesis_done: bool,
    /// Barge-in happened, drop everything still queued
    stopped: bool,
    /// The first chunk began playing
    started: bool,
    /// Concatenated PCM of every synthesized chunk
    tts_pcm: Vec<u8>,
}

/// The session's armed timers. Aborting a handle cancels the pending
/// expiry without a trace.
#[derive(Debug, Default)]
struct Timers {
    session: Option<AbortHandle>,
    no_input: Option<AbortHandle>,
    keypad: Option<AbortHandle>,
    vad_delay: Option<AbortHandle>,
}

impl Timers {
    fn cancel(slot: &mut Option<AbortHandle>) {
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        Self::cancel(&mut self.session);
        Self::cancel(&mut self.no_input);
        Self::cancel(&mut self.keypad);
        Self::cancel(&mut self.vad_delay);
    }
}

/// One call, one task, one inbox.
pub struct CallSession {
    channel_id: String,
    unique_id: String,
    caller_id: String,
    config: EffectiveConfig,
    ops: Arc<dyn SwitchOps>,
    ctx: Arc<EngineContext>,
    registry: Arc<SessionRegistry>,
    inbox_tx: mpsc::Sender<SessionEvent>,

    state: SessionState,
    input_mode: InputMode,
    topology: Option<MediaTopology>,
    prompt: PromptPlayback,
    timers: Timers,

    recognizer: Option<RecognizerSession>,
    /// One-shot latch for the voice-start listener
    voice_started: bool,
    vad_armed: bool,

    text_to_speak: Option<String>,
    keypad_digits: String,
    /// Raw µ-law copy of everything streamed to the recognizer
    stt_ulaw: Vec<u8>,
    tts_recording: Option<PathBuf>,
    stt_recording: Option<PathBuf>,

    finalized: bool,
    cleaned_up: bool,
}

impl CallSession {
    /// Create the session for a channel that just entered the
    /// application. Per-call configuration starts as the process
    /// defaults and is overridden from script variables in [`run`].
    pub fn new(
        channel: ChannelInfo,
        ops: Arc<dyn SwitchOps>,
        ctx: Arc<EngineContext>,
        registry: Arc<SessionRegistry>,
        inbox_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let caller_id = if channel.caller_number.is_empty() {
            "anonymous".to_string()
        } else {
            channel.caller_number
        };
        Self {
            unique_id: channel.id.clone(),
            channel_id: channel.id,
            caller_id,
            config: ctx.defaults.clone(),
            ops,
            ctx,
            registry,
            inbox_tx,
            state: SessionState::Answering,
            input_mode: InputMode::Voice,
            topology: None,
            prompt: PromptPlayback::default(),
            timers: Timers::default(),
            recognizer: None,
            voice_started: false,
            vad_armed: false,
            text_to_speak: None,
            keypad_digits: String::new(),
            stt_ulaw: Vec::new(),
            tts_recording: None,
            stt_recording: None,
            finalized: false,
            cleaned_up: false,
        }
    }

    /// Drive the call to completion. Consumes the session; cleanup runs
    /// exactly once on every exit path.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<SessionEvent>) {
        info!(caller_id = %self.caller_id, "call entered");

        if let Err(e) = self.begin().await {
            warn!(error = %e, "call setup failed");
            self.finalize(Outcome::Error).await;
        }

        while let Some(event) = inbox.recv().await {
            match event {
                SessionEvent::Switch(SwitchEvent::ChannelExit { .. }) => {
                    debug!("channel left the application");
                    break;
                }
                SessionEvent::Switch(event) => self.on_switch_event(event).await,
                SessionEvent::Rtp(event) => self.on_rtp_event(event).await,
                SessionEvent::Recognizer(event) => self.on_recognizer_event(event).await,
                SessionEvent::Synthesis(event) => self.on_synthesis_event(event).await,
                SessionEvent::Timer(kind) => self.on_timer(kind).await,
            }
        }

        self.cleanup().await;
        info!("call terminated");
    }

    /// Answer the channel and stand up everything the call needs:
    /// effective configuration, session timer, snooping topology and the
    /// prompt pipeline.
    async fn begin(&mut self) -> Result<()> {
        let vars = self.fetch_script_variables().await;
        self.config.apply_script_overrides(&vars);
        self.text_to_speak = vars.get("TEXT_TO_SPEAK").cloned();

        if self.config.session_timeout_ms > 0 {
            self.timers.session =
                Some(self.spawn_timer(TimerKind::Session, self.config.session_timeout_ms));
        }

        self.ops.answer(&self.channel_id).await?;

        let prompt_text = self
            .text_to_speak
            .as_deref()
            .map(str::trim)
            .unwrap_or_default();
        if self.config.prompt_mode == PromptMode::Tts && prompt_text.is_empty() {
            warn!("TEXT_TO_SPEAK is missing, nothing to say");
            self.finalize(Outcome::Error).await;
            return Ok(());
        }

        self.build_topology().await?;
        self.start_prompt().await;
        self.set_state(SessionState::PlayingPrompt);
        Ok(())
    }

    /// Bulk variable read with a per-name fallback over the fixed
    /// allow-list.
    async fn fetch_script_variables(&self) -> HashMap<String, String> {
        match self.ops.get_all_variables(&self.channel_id).await {
            Ok(vars) => vars,
            Err(e) => {
                debug!(error = %e, "bulk variable read unavailable, reading per name");
                let mut vars = HashMap::new();
                for name in SCRIPT_VAR_ALLOW_LIST {
                    match self.ops.get_variable(&self.channel_id, name).await {
                        Ok(Some(value)) => {
                            vars.insert((*name).to_string(), value);
                        }
                        Ok(None) => {}
                        Err(e) => debug!(name, error = %e, "variable read failed"),
                    }
                }
                vars
            }
        }
    }

    /// Build the audio-snooping topology: a mixing bridge holding the
    /// caller, a snoop channel copying caller audio, an external media
    /// channel pointed at our RTP receiver, and a second bridge joining
    /// the two internal channels.
    async fn build_topology(&mut self) -> Result<()> {
        let mut topology = MediaTopology::default();
        let result = self.build_topology_inner(&mut topology).await;
        // Keep whatever was built so cleanup can tear it down.
        self.topology = Some(topology);
        result
    }

    async fn build_topology_inner(&self, topology: &mut MediaTopology) -> Result<()> {
        let user_bridge = self.ops.create_mixing_bridge().await?;
        topology.user_bridge = Some(user_bridge.clone());
        self.ops.add_to_bridge(&user_bridge, &self.channel_id).await?;

        let ip: IpAddr = self
            .config
            .external_media_server_ip
            .parse()
            .map_err(|_| {
                EngineError::config(format!(
                    "invalid external media ip: {}",
                    self.config.external_media_server_ip
                ))
            })?;
        let (rtp_tx, mut rtp_rx) = mpsc::channel(256);
        let rtp =
            RtpReceiver::listen(ip, self.config.external_media_server_port, rtp_tx).await?;
        topology.rtp = Some(rtp.clone());

        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rtp_rx.recv().await {
                if inbox.send(SessionEvent::Rtp(event)).await.is_err() {
                    break;
                }
            }
        });

        let snoop = self
            .ops
            .snoop_channel(&self.channel_id, "in", INTERNAL_CHANNEL_MARKER)
            .await?;
        topology.snoop_channel = Some(snoop.clone());

        let external = self
            .ops
            .external_media(
                &self.config.external_media_server_ip,
                rtp.local_addr().port(),
                &self.config.external_media_audio_format,
                INTERNAL_CHANNEL_MARKER,
            )
            .await?;
        topology.external_media_channel = Some(external.clone());

        let snoop_bridge = self.ops.create_mixing_bridge().await?;
        topology.snoop_bridge = Some(snoop_bridge.clone());
        self.ops.add_to_bridge(&snoop_bridge, &snoop).await?;
        self.ops.add_to_bridge(&snoop_bridge, &external).await?;

        debug!(%user_bridge, %snoop_bridge, media = %rtp.local_addr(), "media topology ready");
        Ok(())
    }

    /// Start prompt delivery without blocking the session loop.
    async fn start_prompt(&mut self) {
        match self.config.prompt_mode {
            PromptMode::Playback => {
                self.prompt.synthesis_done = true;
                self.start_file_playback().await;
            }
            PromptMode::Tts => {
                let text = self.text_to_speak.clone().unwrap_or_default();
                match self.ctx.synthesizer.synthesize(&text).await {
                    Ok(mut chunks) => {
                        let inbox = self.inbox_tx.clone();
                        tokio::spawn(async move {
                            while let Some(event) = chunks.recv().await {
                                if inbox.send(SessionEvent::Synthesis(event)).await.is_err() {
                                    break;
                                }
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "synthesis could not start, abandoning prompt");
                        self.prompt.synthesis_done = true;
                        self.prompt_finished().await;
                    }
                }
            }
        }
    }

    async fn start_file_playback(&mut self) {
        let Some(bridge) = self.user_bridge() else {
            return;
        };
        let media_uri = format!("sound:{}", self.config.playback_file_path);
        match self.ops.play_on_bridge(&bridge, &media_uri).await {
            Ok(playback_id) => {
                self.registry.register_playback(&playback_id, &self.channel_id);
                self.prompt.active = Some(ActivePlayback {
                    id: playback_id,
                    artifact: None,
                });
                self.on_chunk_started().await;
            }
            Err(e) => {
                warn!(error = %e, "prompt file playback failed to start");
                self.prompt_finished().await;
            }
        }
    }

    fn user_bridge(&self) -> Option<String> {
        self.topology.as_ref().and_then(|t| t.user_bridge.clone())
    }

    fn rtp(&self) -> Option<RtpReceiverHandle> {
        self.topology.as_ref().and_then(|t| t.rtp.clone())
    }

    async fn on_synthesis_event(&mut self, event: SynthesisEvent) {
        match event {
            SynthesisEvent::Chunk(pcm) => {
                self.prompt.tts_pcm.extend_from_slice(&pcm);
                if self.prompt.stopped || self.finalized {
                    return;
                }
                match self.ctx.cache.put(&pcm).await {
                    Ok(artifact) => {
                        self.prompt.queue.push_back(artifact);
                        if self.prompt.active.is_none() {
                            self.start_next_chunk().await;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to cache prompt chunk"),
                }
            }
            SynthesisEvent::End => {
                self.prompt.synthesis_done = true;
                if !self.prompt.tts_pcm.is_empty() {
                    match self
                        .ctx
                        .recordings
                        .save(
                            RecordingKind::Tts,
                            &self.unique_id,
                            &self.caller_id,
                            &self.prompt.tts_pcm,
                        )
                        .await
                    {
                        Ok(path) => self.tts_recording = Some(path),
                        Err(e) => warn!(error = %e, "failed to save synthesized recording"),
                    }
                }
                if self.prompt.active.is_none() && self.prompt.queue.is_empty() {
                    self.prompt_finished().await;
                }
            }
            SynthesisEvent::Error(reason) => {
                warn!(%reason, "synthesis failed, abandoning prompt");
                self.prompt.synthesis_done = true;
                if self.prompt.active.is_none() && self.prompt.queue.is_empty() {
                    self.prompt_finished().await;
                }
            }
        }
    }

    /// Start the next queued chunk. Playback operations are serialized:
    /// a chunk only starts after the previous one's finished signal.
    async fn start_next_chunk(&mut self) {
        while let Some(artifact) = self.prompt.queue.pop_front() {
            let Some(bridge) = self.user_bridge() else {
                self.ctx.cache.remove(&artifact.path).await;
                continue;
            };
            match self.ops.play_on_bridge(&bridge, &artifact.media_uri).await {
                Ok(playback_id) => {
                    self.registry.register_playback(&playback_id, &self.channel_id);
                    self.prompt.active = Some(ActivePlayback {
                        id: playback_id,
                        artifact: Some(artifact),
                    });
                    self.on_chunk_started().await;
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "prompt chunk failed to start, skipping");
                    self.ctx.cache.remove(&artifact.path).await;
                }
            }
        }
        if self.prompt.synthesis_done {
            self.prompt_finished().await;
        }
    }

    /// First-chunk bookkeeping: VAD arming in after_prompt_start mode.
    async fn on_chunk_started(&mut self) {
        if self.prompt.started {
            return;
        }
        self.prompt.started = true;
        if self.config.vad_activation_mode == VadActivationMode::AfterPromptStart
            && !self.vad_armed
        {
            let delay = self.config.vad_activation_delay_ms;
            if delay == 0 {
                self.arm_vad().await;
            } else {
                self.timers.vad_delay = Some(self.spawn_timer(TimerKind::VadDelay, delay));
            }
        }
    }

    async fn on_playback_event(&mut self, playback_id: &str, failed: bool) {
        let matches = self
            .prompt
            .active
            .as_ref()
            .map(|a| a.id == playback_id)
            .unwrap_or(false);
        if !matches {
            debug!(playback_id, "playback signal for a playback we no longer track");
            return;
        }
        if let Some(active) = self.prompt.active.take() {
            self.registry.remove_playback(&active.id);
            if let Some(artifact) = active.artifact {
                self.ctx.cache.remove(&artifact.path).await;
            }
        }
        if failed {
            warn!(playback_id, "prompt playback failed");
        }
        if self.prompt.stopped || self.finalized {
            return;
        }
        if !self.prompt.queue.is_empty() {
            self.start_next_chunk().await;
        } else if self.prompt.synthesis_done {
            self.prompt_finished().await;
        }
    }

    /// The prompt is over, one way or another.
    async fn prompt_finished(&mut self) {
        if self.state == SessionState::PlayingPrompt {
            self.set_state(SessionState::Listening);
        }
        if !self.vad_armed {
            self.arm_vad().await;
        }
    }

    /// Arm voice detection: pre-buffer on, no-input timer running,
    /// talk-detect activated on the channel.
    async fn arm_vad(&mut self) {
        if self.vad_armed || self.finalized {
            return;
        }
        self.vad_armed = true;
        info!(
            prebuffer_frames = self.config.rtp_prebuffer_size,
            "arming voice activity detection"
        );

        if let Some(rtp) = self.rtp() {
            if let Err(e) = rtp.start_pre_buffering(self.config.rtp_prebuffer_size).await {
                warn!(error = %e, "failed to start pre-buffering");
            }
        }
        if self.config.no_input_timeout_ms > 0 {
            self.timers.no_input =
                Some(self.spawn_timer(TimerKind::NoInput, self.config.no_input_timeout_ms));
        }
        let args = self.config.talk_detect_args();
        if let Err(e) = self
            .ops
            .set_variable(&self.channel_id, "TALK_DETECT(set)", &args)
            .await
        {
            warn!(error = %e, "failed to activate talk detection");
        }
    }

    async fn on_switch_event(&mut self, event: SwitchEvent) {
        match event {
            SwitchEvent::VoiceStart { .. } => self.on_voice_start().await,
            SwitchEvent::VoiceEnd { duration_ms, .. } => self.on_voice_end(duration_ms).await,
            SwitchEvent::DtmfDigit { digit, .. } => self.on_digit(digit).await,
            SwitchEvent::PlaybackFinished { playback_id } => {
                self.on_playback_event(&playback_id, false).await
            }
            SwitchEvent::PlaybackFailed { playback_id } => {
                self.on_playback_event(&playback_id, true).await
            }
            // Enter is handled by the engine, exit by the run loop.
            SwitchEvent::ChannelEnter { .. } | SwitchEvent::ChannelExit { .. } => {}
        }
    }

    /// Voice-start: one shot. Cancels the no-input timer, barges in over
    /// a still-playing prompt, flushes the pre-buffer into a fresh
    /// recognizer session and switches the receiver to live delivery.
    async fn on_voice_start(&mut self) {
        if self.voice_started
            || self.input_mode == InputMode::Keypad
            || self.finalized
            || !self.vad_armed
        {
            return;
        }
        self.voice_started = true;
        info!("voice detected");
        Timers::cancel(&mut self.timers.no_input);
        self.stop_prompt_for_barge_in().await;
        self.set_state(SessionState::Recognizing);

        let flushed = match self.rtp() {
            Some(rtp) => match rtp.stop_pre_buffering_and_flush().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "pre-buffer flush failed");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        self.stt_ulaw.extend_from_slice(&flushed);

        match self.ctx.recognizer.start().await {
            Ok((session, mut events_rx)) => {
                let inbox = self.inbox_tx.clone();
                tokio::spawn(async move {
                    while let Some(event) = events_rx.recv().await {
                        if inbox.send(SessionEvent::Recognizer(event)).await.is_err() {
                            break;
                        }
                    }
                });
                if !flushed.is_empty() {
                    if let Err(e) = session.write(ulaw_to_pcm(&flushed)).await {
                        warn!(error = %e, "failed to feed pre-buffer to recognizer");
                    }
                }
                self.recognizer = Some(session);
            }
            Err(e) => {
                warn!(error = %e, "recognizer failed to open, resolving with empty transcript");
                self.finalize(Outcome::Voice {
                    transcript: String::new(),
                })
                .await;
            }
        }
    }

    /// Barge-in: stop the active playback and drop everything queued.
    async fn stop_prompt_for_barge_in(&mut self) {
        self.prompt.stopped = true;
        Timers::cancel(&mut self.timers.vad_delay);

        while let Some(artifact) = self.prompt.queue.pop_front() {
            self.ctx.cache.remove(&artifact.path).await;
        }
        if let Some(active) = self.prompt.active.take() {
            debug!(playback_id = %active.id, "barge-in, stopping prompt");
            self.registry.remove_playback(&active.id);
            if let Err(e) = self.ops.stop_playback(&active.id).await {
                warn!(error = %e, "failed to stop prompt playback");
            }
            if let Some(artifact) = active.artifact {
                self.ctx.cache.remove(&artifact.path).await;
            }
        }
        if self.state == SessionState::PlayingPrompt {
            self.set_state(SessionState::Listening);
        }
    }

    async fn on_voice_end(&mut self, duration_ms: Option<u64>) {
        if self.input_mode == InputMode::Keypad || self.finalized {
            return;
        }
        if self.state == SessionState::Recognizing {
            info!(?duration_ms, "voice ended, draining recognizer");
            if let Some(recognizer) = &mut self.recognizer {
                recognizer.stop();
            }
        }
    }

    /// Keypad input. The first digit preempts the voice path entirely;
    /// each digit re-arms the completion timer.
    async fn on_digit(&mut self, digit: char) {
        if !self.config.enable_dtmf || self.finalized {
            return;
        }
        if self.input_mode == InputMode::Voice {
            info!(%digit, "keypad input, preempting voice path");
            self.input_mode = InputMode::Keypad;
            Timers::cancel(&mut self.timers.no_input);
            Timers::cancel(&mut self.timers.vad_delay);
            if let Some(recognizer) = &mut self.recognizer {
                recognizer.stop();
            }
            self.stop_prompt_for_barge_in().await;
            self.set_state(SessionState::Recognizing);
        }
        self.keypad_digits.push(digit);
        Timers::cancel(&mut self.timers.keypad);
        self.timers.keypad = Some(self.spawn_timer(
            TimerKind::KeypadComplete,
            self.config.dtmf_completion_timeout_ms,
        ));
    }

    async fn on_rtp_event(&mut self, event: RtpEvent) {
        match event {
            RtpEvent::Listening { local_addr } => {
                debug!(%local_addr, "media endpoint ready");
            }
            RtpEvent::Frame { payload } => {
                if self.input_mode == InputMode::Keypad || self.finalized {
                    return;
                }
                if let Some(recognizer) = &self.recognizer {
                    if recognizer.is_stopped() {
                        return;
                    }
                    self.stt_ulaw.extend_from_slice(&payload);
                    if let Err(e) = recognizer.write(ulaw_to_pcm(&payload)).await {
                        debug!(error = %e, "recognizer write failed");
                    }
                }
            }
            RtpEvent::SocketError { reason } => {
                warn!(%reason, "media socket failed");
                self.finalize(Outcome::Error).await;
            }
        }
    }

    async fn on_recognizer_event(&mut self, event: RecognizerEvent) {
        match event {
            RecognizerEvent::Ready => debug!("recognizer accepts audio"),
            RecognizerEvent::Partial(text) => debug!(%text, "partial hypothesis"),
            RecognizerEvent::Ended(transcript) => {
                if self.input_mode == InputMode::Keypad || self.finalized {
                    debug!("recognizer ended after the call moved on, ignoring");
                    return;
                }
                self.finalize(Outcome::Voice { transcript }).await;
            }
            RecognizerEvent::Error(reason) => {
                if self.input_mode == InputMode::Keypad || self.finalized {
                    return;
                }
                warn!(%reason, "recognition error, resolving with empty transcript");
                self.finalize(Outcome::Voice {
                    transcript: String::new(),
                })
                .await;
            }
        }
    }

    async fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Session => {
                warn!("session timeout, hanging up");
                self.finalize(Outcome::Timeout).await;
            }
            TimerKind::NoInput => {
                info!("no input before timeout");
                self.finalize(Outcome::NoInput).await;
            }
            TimerKind::KeypadComplete => {
                info!(digits = %self.keypad_digits, "keypad input complete");
                self.finalize(Outcome::Keypad).await;
            }
            TimerKind::VadDelay => {
                self.timers.vad_delay = None;
                self.arm_vad().await;
            }
        }
    }

    /// Resolve the call: write result variables, save the caller
    /// recording, route the channel onward and persist the interaction
    /// row. Runs at most once.
    async fn finalize(&mut self, outcome: Outcome) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        self.set_state(SessionState::Finalizing);
        self.timers.cancel_all();
        info!(outcome = outcome.mode_tag(), "finalizing call");

        // Keypad-only calls produce no caller recording.
        if !matches!(outcome, Outcome::Keypad) && !self.stt_ulaw.is_empty() {
            let pcm = ulaw_to_pcm(&self.stt_ulaw);
            match self
                .ctx
                .recordings
                .save(RecordingKind::Stt, &self.unique_id, &self.caller_id, &pcm)
                .await
            {
                Ok(path) => self.stt_recording = Some(path),
                Err(e) => warn!(error = %e, "failed to save caller recording"),
            }
        }

        match &outcome {
            Outcome::Voice { transcript } => {
                let transcript = transcript.clone();
                self.guarded_set_variable("TRANSCRIPT", &transcript).await;
                self.guarded_set_variable("RECOGNITION_MODE", "VOICE").await;
            }
            Outcome::Keypad => {
                let digits = self.keypad_digits.clone();
                self.guarded_set_variable("DTMF_RESULT", &digits).await;
                self.guarded_set_variable("RECOGNITION_MODE", "DTMF").await;
            }
            other => {
                self.guarded_set_variable("RECOGNITION_MODE", other.mode_tag())
                    .await;
            }
        }

        match &outcome {
            Outcome::Voice { .. } | Outcome::Keypad | Outcome::Error => {
                if let Err(e) = self.ops.continue_script(&self.channel_id).await {
                    warn!(error = %e, "failed to continue the script");
                }
            }
            Outcome::NoInput | Outcome::Timeout => {
                if let Err(e) = self.ops.hangup(&self.channel_id).await {
                    warn!(error = %e, "failed to hang up");
                }
            }
        }

        let record = InteractionRecord {
            unique_id: self.unique_id.clone(),
            caller_id: self.caller_id.clone(),
            text_to_synthesize: self.text_to_speak.clone(),
            synthesized_audio_path: self.tts_recording.as_ref().map(|p| p.display().to_string()),
            stt_audio_path: self.stt_recording.as_ref().map(|p| p.display().to_string()),
            recognition_mode: outcome.mode_tag().to_string(),
            transcript: match &outcome {
                Outcome::Voice { transcript } => Some(transcript.clone()),
                _ => None,
            },
            keypad_digits: if matches!(outcome, Outcome::Keypad) {
                Some(self.keypad_digits.clone())
            } else {
                None
            },
        };
        let database = self.ctx.database.clone();
        tokio::spawn(async move {
            if let Err(e) = database.record_interaction(&record).await {
                warn!(error = %e, "failed to persist interaction");
            }
        });
    }

    async fn guarded_set_variable(&self, name: &str, value: &str) {
        if let Err(e) = self.ops.set_variable(&self.channel_id, name, value).await {
            warn!(name, error = %e, "failed to write result variable");
        }
    }

    /// Release every resource exactly once. Each step is best-effort so
    /// one failure never leaves the rest dangling.
    async fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        debug!("releasing call resources");

        self.timers.cancel_all();

        while let Some(artifact) = self.prompt.queue.pop_front() {
            self.ctx.cache.remove(&artifact.path).await;
        }
        if let Some(active) = self.prompt.active.take() {
            self.registry.remove_playback(&active.id);
            let _ = self.ops.stop_playback(&active.id).await;
            if let Some(artifact) = active.artifact {
                self.ctx.cache.remove(&artifact.path).await;
            }
        }

        if let Some(topology) = self.topology.take() {
            if let Some(channel) = &topology.snoop_channel {
                if let Err(e) = self.ops.hangup(channel).await {
                    debug!(error = %e, "snoop channel hangup failed");
                }
            }
            if let Some(channel) = &topology.external_media_channel {
                if let Err(e) = self.ops.hangup(channel).await {
                    debug!(error = %e, "external media hangup failed");
                }
            }
            if let Some(bridge) = &topology.snoop_bridge {
                if let Err(e) = self.ops.destroy_bridge(bridge).await {
                    debug!(error = %e, "snoop bridge destroy failed");
                }
            }
            if let Some(bridge) = &topology.user_bridge {
                if let Err(e) = self.ops.destroy_bridge(bridge).await {
                    debug!(error = %e, "user bridge destroy failed");
                }
            }
            if let Some(rtp) = &topology.rtp {
                rtp.close().await;
            }
        }

        if let Some(mut recognizer) = self.recognizer.take() {
            recognizer.stop();
        }

        self.registry.remove_session(&self.channel_id);
        self.set_state(SessionState::Terminated);
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "state transition");
            self.state = next;
        }
    }

    fn spawn_timer(&self, kind: TimerKind, ms: u64) -> AbortHandle {
        let inbox = self.inbox_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
            let _ = inbox.send(SessionEvent::Timer(kind)).await;
        });
        task.abort_handle()
    }
}
