//! End-to-end call flows against an in-memory switch and scripted
//! speech backends. Only the RTP leg is real: tests send µ-law frames
//! over UDP to whatever port the session bound.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use uuid::Uuid;

use voxgate_call_engine::config::ProcessConfig;
use voxgate_call_engine::database::DatabaseManager;
use voxgate_call_engine::orchestrator::{Engine, EngineContext};
use voxgate_call_engine::prompt::PromptCache;
use voxgate_call_engine::recordings::RecordingStore;
use voxgate_call_engine::switch::{
    ChannelInfo, SwitchError, SwitchEvent, SwitchOps, SwitchResult,
};
use voxgate_speech_core::{
    ProviderEvent, ProviderSession, Recognizer, RecognizerBackend, SynthesisEvent, Synthesizer,
    SynthesizerBackend,
};

const CHANNEL: &str = "PJSIP/100-00000001";

// ---------------------------------------------------------------------------
// In-memory switch

#[derive(Default)]
struct SwitchLog {
    answered: Vec<String>,
    hungup: Vec<String>,
    continued: Vec<String>,
    set_vars: Vec<(String, String, String)>,
    bridges_created: Vec<String>,
    bridges_destroyed: Vec<String>,
    bridge_adds: Vec<(String, String)>,
    snoops: Vec<(String, String, String)>,
    external_media: Vec<(String, u16, String, String)>,
    plays: Vec<(String, String, String)>,
    stopped_playbacks: Vec<String>,
    next_id: u32,
}

impl SwitchLog {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

struct MockSwitch {
    log: Mutex<SwitchLog>,
    script_vars: HashMap<String, String>,
    bulk_vars: bool,
}

impl MockSwitch {
    fn new(script_vars: HashMap<String, String>, bulk_vars: bool) -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(SwitchLog::default()),
            script_vars,
            bulk_vars,
        })
    }

    fn log(&self) -> MutexGuard<'_, SwitchLog> {
        self.log.lock().unwrap()
    }

    /// Last value written for a channel variable.
    fn written_var(&self, channel_id: &str, name: &str) -> Option<String> {
        self.log()
            .set_vars
            .iter()
            .rev()
            .find(|(c, n, _)| c == channel_id && n == name)
            .map(|(_, _, v)| v.clone())
    }
}

#[async_trait]
impl SwitchOps for MockSwitch {
    async fn answer(&self, channel_id: &str) -> SwitchResult<()> {
        self.log().answered.push(channel_id.to_string());
        Ok(())
    }

    async fn get_variable(&self, _channel_id: &str, name: &str) -> SwitchResult<Option<String>> {
        Ok(self.script_vars.get(name).cloned())
    }

    async fn get_all_variables(&self, _channel_id: &str) -> SwitchResult<HashMap<String, String>> {
        if self.bulk_vars {
            Ok(self.script_vars.clone())
        } else {
            Err(SwitchError::rejected("get_all_variables", 404))
        }
    }

    async fn set_variable(&self, channel_id: &str, name: &str, value: &str) -> SwitchResult<()> {
        self.log().set_vars.push((
            channel_id.to_string(),
            name.to_string(),
            value.to_string(),
        ));
        Ok(())
    }

    async fn hangup(&self, channel_id: &str) -> SwitchResult<()> {
        self.log().hungup.push(channel_id.to_string());
        Ok(())
    }

    async fn continue_script(&self, channel_id: &str) -> SwitchResult<()> {
        self.log().continued.push(channel_id.to_string());
        Ok(())
    }

    async fn create_mixing_bridge(&self) -> SwitchResult<String> {
        let mut log = self.log();
        let id = log.next("bridge");
        log.bridges_created.push(id.clone());
        Ok(id)
    }

    async fn add_to_bridge(&self, bridge_id: &str, channel_id: &str) -> SwitchResult<()> {
        self.log()
            .bridge_adds
            .push((bridge_id.to_string(), channel_id.to_string()));
        Ok(())
    }

    async fn destroy_bridge(&self, bridge_id: &str) -> SwitchResult<()> {
        self.log().bridges_destroyed.push(bridge_id.to_string());
        Ok(())
    }

    async fn snoop_channel(
        &self,
        channel_id: &str,
        spy: &str,
        app_args: &str,
    ) -> SwitchResult<String> {
        let mut log = self.log();
        let id = log.next("snoop");
        log.snoops
            .push((channel_id.to_string(), spy.to_string(), app_args.to_string()));
        Ok(id)
    }

    async fn external_media(
        &self,
        host: &str,
        port: u16,
        format: &str,
        app_args: &str,
    ) -> SwitchResult<String> {
        let mut log = self.log();
        let id = log.next("ext");
        log.external_media.push((
            host.to_string(),
            port,
            format.to_string(),
            app_args.to_string(),
        ));
        Ok(id)
    }

    async fn play_on_bridge(&self, bridge_id: &str, media_uri: &str) -> SwitchResult<String> {
        let mut log = self.log();
        let id = log.next("pb");
        log.plays
            .push((id.clone(), bridge_id.to_string(), media_uri.to_string()));
        Ok(id)
    }

    async fn stop_playback(&self, playback_id: &str) -> SwitchResult<()> {
        self.log().stopped_playbacks.push(playback_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scripted speech backends

#[derive(Default)]
struct RecognizerProbe {
    open_count: usize,
    audio: Vec<u8>,
}

struct ScriptedRecognizer {
    segments: Vec<String>,
    /// When false, the provider never reports a session end (a hung
    /// provider), which lets timeout scenarios run.
    finishes: bool,
    probe: Arc<Mutex<RecognizerProbe>>,
}

#[async_trait]
impl RecognizerBackend for ScriptedRecognizer {
    async fn open(&self) -> voxgate_speech_core::Result<ProviderSession> {
        self.probe.lock().unwrap().open_count += 1;
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(256);
        let (provider_tx, provider_rx) = mpsc::channel(64);
        let segments = self.segments.clone();
        let finishes = self.finishes;
        let probe = self.probe.clone();

        tokio::spawn(async move {
            let _ = provider_tx.send(ProviderEvent::SessionStarted).await;
            while let Some(pcm) = audio_rx.recv().await {
                probe.lock().unwrap().audio.extend_from_slice(&pcm);
            }
            if finishes {
                for segment in segments {
                    let _ = provider_tx.send(ProviderEvent::Recognized(segment)).await;
                }
                let _ = provider_tx.send(ProviderEvent::SessionStopped).await;
            }
            // Otherwise the provider just goes quiet.
        });

        Ok(ProviderSession {
            audio_tx,
            events_rx: provider_rx,
        })
    }
}

struct ScriptedSynthesizer {
    chunks: Vec<Vec<u8>>,
}

#[async_trait]
impl SynthesizerBackend for ScriptedSynthesizer {
    async fn synthesize(
        &self,
        _text: &str,
    ) -> voxgate_speech_core::Result<mpsc::Receiver<SynthesisEvent>> {
        let (tx, rx) = mpsc::channel(32);
        let chunks = self.chunks.clone();
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(SynthesisEvent::Chunk(chunk)).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(SynthesisEvent::End).await;
        });
        Ok(rx)
    }
}

// ---------------------------------------------------------------------------
// Harness

struct Harness {
    engine: Engine,
    switch: Arc<MockSwitch>,
    database: DatabaseManager,
    cache_dir: PathBuf,
    recordings_root: PathBuf,
    probe: Arc<Mutex<RecognizerProbe>>,
}

fn base_vars() -> HashMap<String, String> {
    [
        ("TEXT_TO_SPEAK", "hola"),
        ("APP_VAR_EXTERNAL_MEDIA_SERVER_PORT", "0"),
        ("APP_VAR_VAD_ACTIVATION_DELAY_MS", "0"),
        ("APP_VAR_NO_INPUT_TIMEOUT_MS", "0"),
        ("APP_VAR_ARI_SESSION_TIMEOUT_MS", "0"),
        ("APP_VAR_DTMF_COMPLETION_TIMEOUT_MS", "300"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

async fn harness(
    script_vars: HashMap<String, String>,
    bulk_vars: bool,
    synth_chunks: Vec<Vec<u8>>,
    segments: Vec<&str>,
    recognizer_finishes: bool,
) -> Harness {
    let defaults = ProcessConfig::parse_from(["voxgate"])
        .to_effective()
        .expect("defaults must be valid");

    let tag = Uuid::new_v4();
    let cache_dir = std::env::temp_dir().join(format!("voxgate-flow-cache-{tag}"));
    let recordings_root = std::env::temp_dir().join(format!("voxgate-flow-rec-{tag}"));
    let database = DatabaseManager::new("sqlite::memory:").await.unwrap();
    let probe = Arc::new(Mutex::new(RecognizerProbe::default()));

    let context = Arc::new(EngineContext {
        defaults,
        cache: PromptCache::with_dir(cache_dir.clone()).await.unwrap(),
        recordings: RecordingStore::init(&recordings_root).await.unwrap(),
        database: database.clone(),
        synthesizer: Synthesizer::new(Arc::new(ScriptedSynthesizer {
            chunks: synth_chunks,
        })),
        recognizer: Recognizer::new(Arc::new(ScriptedRecognizer {
            segments: segments.into_iter().map(str::to_string).collect(),
            finishes: recognizer_finishes,
            probe: probe.clone(),
        })),
    });

    let switch = MockSwitch::new(script_vars, bulk_vars);
    let engine = Engine::new(switch.clone(), context);

    Harness {
        engine,
        switch,
        database,
        cache_dir,
        recordings_root,
        probe,
    }
}

impl Harness {
    async fn enter_call(&self) {
        self.engine
            .dispatch(SwitchEvent::ChannelEnter {
                channel: ChannelInfo {
                    id: CHANNEL.to_string(),
                    caller_number: "600123456".to_string(),
                },
                args: vec![],
            })
            .await;
    }

    async fn exit_call(&self) {
        self.engine
            .dispatch(SwitchEvent::ChannelExit {
                channel_id: CHANNEL.to_string(),
            })
            .await;
    }

    async fn voice_start(&self) {
        self.engine
            .dispatch(SwitchEvent::VoiceStart {
                channel_id: CHANNEL.to_string(),
            })
            .await;
    }

    async fn voice_end(&self) {
        self.engine
            .dispatch(SwitchEvent::VoiceEnd {
                channel_id: CHANNEL.to_string(),
                duration_ms: Some(1000),
            })
            .await;
    }

    async fn digit(&self, digit: char) {
        self.engine
            .dispatch(SwitchEvent::DtmfDigit {
                channel_id: CHANNEL.to_string(),
                digit,
            })
            .await;
    }

    async fn playback_finished(&self, playback_id: &str) {
        // The session registers the playback route right after the play
        // call returns; give that a moment before signalling completion.
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.engine
            .dispatch(SwitchEvent::PlaybackFinished {
                playback_id: playback_id.to_string(),
            })
            .await;
    }

    /// Media endpoint the session bound, once the topology exists.
    fn media_port(&self) -> u16 {
        self.switch.log().external_media[0].1
    }

    fn cache_file_count(&self) -> usize {
        std::fs::read_dir(&self.cache_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

fn rtp_packet(sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; 12 + payload.len()];
    buf[0] = 0x80;
    buf[2..4].copy_from_slice(&sequence.to_be_bytes());
    buf[12..].copy_from_slice(payload);
    buf
}

// ---------------------------------------------------------------------------
// Scenarios

#[tokio::test]
async fn test_happy_path_voice() {
    let h = harness(base_vars(), true, vec![vec![1u8; 320]], vec!["buenos días"], true).await;
    h.enter_call().await;

    // One synthesized chunk starts playing; finishing it ends the prompt.
    wait_until("prompt playback", || h.switch.log().plays.len() == 1).await;
    let playback_id = h.switch.log().plays[0].0.clone();
    wait_until("talk detect armed", || {
        h.switch
            .written_var(CHANNEL, "TALK_DETECT(set)")
            .is_some()
    })
    .await;
    h.playback_finished(&playback_id).await;

    // Caller audio ahead of the voice decision lands in the pre-buffer.
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender
        .connect(("127.0.0.1", h.media_port()))
        .await
        .unwrap();
    for seq in 0u16..5 {
        sender.send(&rtp_packet(seq, &[0xFFu8; 160])).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(250)).await;

    h.voice_start().await;

    // Live frames follow the flushed pre-buffer into the recognizer.
    for seq in 5u16..8 {
        sender.send(&rtp_packet(seq, &[0xFFu8; 160])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    wait_until("recognizer received audio", || {
        h.probe.lock().unwrap().audio.len() >= 5 * 320
    })
    .await;

    h.voice_end().await;

    wait_until("transcript written", || {
        h.switch.written_var(CHANNEL, "TRANSCRIPT").as_deref() == Some("buenos días")
    })
    .await;
    assert_eq!(
        h.switch.written_var(CHANNEL, "RECOGNITION_MODE").as_deref(),
        Some("VOICE")
    );
    wait_until("script continued", || {
        h.switch.log().continued.contains(&CHANNEL.to_string())
    })
    .await;

    h.exit_call().await;
    wait_until("both bridges destroyed", || {
        h.switch.log().bridges_destroyed.len() == 2
    })
    .await;

    // Both internal channels hung up, exactly once each.
    let log = h.switch.log();
    let snoop_hangups = log.hungup.iter().filter(|c| c.starts_with("snoop")).count();
    let ext_hangups = log.hungup.iter().filter(|c| c.starts_with("ext")).count();
    assert_eq!(snoop_hangups, 1);
    assert_eq!(ext_hangups, 1);
    assert_eq!(log.snoops[0].1, "in");
    assert_eq!(log.snoops[0].2, "internal");
    drop(log);

    // No temporary prompt files left behind.
    assert_eq!(h.cache_file_count(), 0);

    // Interaction row and both recordings.
    let mut rows = Vec::new();
    for _ in 0..100 {
        rows = h.database.interactions_for(CHANNEL).await.unwrap();
        if !rows.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].recognition_mode, "VOICE");
    assert_eq!(rows[0].transcript.as_deref(), Some("buenos días"));
    assert!(rows[0].synthesized_audio_path.is_some());
    assert!(rows[0].stt_audio_path.is_some());
    assert!(h.recordings_root.join("tts").read_dir().unwrap().count() == 1);
    assert!(h.recordings_root.join("stt").read_dir().unwrap().count() == 1);
}

#[tokio::test]
async fn test_barge_in_stops_prompt_and_drops_queue() {
    let chunks = (0..5).map(|_| vec![2u8; 320]).collect();
    let h = harness(base_vars(), true, chunks, vec!["ok"], true).await;
    h.enter_call().await;

    wait_until("first chunk playing", || h.switch.log().plays.len() == 1).await;
    let first = h.switch.log().plays[0].0.clone();
    h.playback_finished(&first).await;
    wait_until("second chunk playing", || h.switch.log().plays.len() == 2).await;
    let second = h.switch.log().plays[1].0.clone();

    // Caller interrupts during chunk 2.
    h.voice_start().await;
    wait_until("active playback stopped", || {
        h.switch.log().stopped_playbacks.contains(&second)
    })
    .await;

    h.voice_end().await;
    wait_until("transcript written", || {
        h.switch.written_var(CHANNEL, "TRANSCRIPT").as_deref() == Some("ok")
    })
    .await;

    // Chunks 3..5 never play.
    assert_eq!(h.switch.log().plays.len(), 2);

    h.exit_call().await;
    wait_until("cleanup", || h.switch.log().bridges_destroyed.len() == 2).await;
    assert_eq!(h.cache_file_count(), 0);
}

#[tokio::test]
async fn test_keypad_preempts_voice() {
    let chunks = (0..3).map(|_| vec![3u8; 320]).collect();
    let h = harness(base_vars(), true, chunks, vec!["never used"], true).await;
    h.enter_call().await;

    wait_until("prompt playing", || !h.switch.log().plays.is_empty()).await;
    let first = h.switch.log().plays[0].0.clone();

    h.digit('1').await;
    wait_until("barge-in on keypad", || {
        h.switch.log().stopped_playbacks.contains(&first)
    })
    .await;
    h.digit('2').await;
    h.digit('3').await;

    // Completion timer (300 ms) resolves the keypad input.
    wait_until("keypad result written", || {
        h.switch.written_var(CHANNEL, "DTMF_RESULT").as_deref() == Some("123")
    })
    .await;
    assert_eq!(
        h.switch.written_var(CHANNEL, "RECOGNITION_MODE").as_deref(),
        Some("DTMF")
    );
    wait_until("script continued", || {
        h.switch.log().continued.contains(&CHANNEL.to_string())
    })
    .await;

    // The voice path never opened a recognizer session.
    assert_eq!(h.probe.lock().unwrap().open_count, 0);

    h.exit_call().await;
    wait_until("cleanup", || h.switch.log().bridges_destroyed.len() == 2).await;

    // Keypad-only calls keep no caller recording.
    let rows = h.database.interactions_for(CHANNEL).await.unwrap();
    if let Some(row) = rows.first() {
        assert_eq!(row.recognition_mode, "DTMF");
        assert_eq!(row.keypad_digits.as_deref(), Some("123"));
        assert!(row.stt_audio_path.is_none());
    }
}

#[tokio::test]
async fn test_no_input_timeout_hangs_up() {
    let mut vars = base_vars();
    vars.insert("APP_VAR_NO_INPUT_TIMEOUT_MS".into(), "300".into());
    let h = harness(vars, true, vec![vec![4u8; 320]], vec![], true).await;
    h.enter_call().await;

    wait_until("prompt playing", || !h.switch.log().plays.is_empty()).await;
    let playback_id = h.switch.log().plays[0].0.clone();
    h.playback_finished(&playback_id).await;

    // Nobody speaks; the no-input timer fires.
    wait_until("no-input hangup", || {
        h.switch.log().hungup.contains(&CHANNEL.to_string())
    })
    .await;
    assert_eq!(
        h.switch.written_var(CHANNEL, "RECOGNITION_MODE").as_deref(),
        Some("NO_INPUT")
    );

    h.exit_call().await;
    wait_until("cleanup", || h.switch.log().bridges_destroyed.len() == 2).await;
}

#[tokio::test]
async fn test_session_timeout_with_hung_recognizer() {
    let mut vars = base_vars();
    vars.insert("APP_VAR_ARI_SESSION_TIMEOUT_MS".into(), "500".into());
    // The provider never reports an end of session.
    let h = harness(vars, true, vec![vec![5u8; 320]], vec![], false).await;
    h.enter_call().await;

    wait_until("prompt playing", || !h.switch.log().plays.is_empty()).await;
    let playback_id = h.switch.log().plays[0].0.clone();
    h.playback_finished(&playback_id).await;

    h.voice_start().await;
    h.voice_end().await;

    // The recognizer hangs; only the session ceiling resolves the call.
    wait_until("session timeout hangup", || {
        h.switch.log().hungup.contains(&CHANNEL.to_string())
    })
    .await;
    assert_eq!(
        h.switch.written_var(CHANNEL, "RECOGNITION_MODE").as_deref(),
        Some("TIMEOUT")
    );

    h.exit_call().await;
    wait_until("cleanup", || h.switch.log().bridges_destroyed.len() == 2).await;
}

#[tokio::test]
async fn test_missing_prompt_text_finalizes_with_error() {
    let mut vars = base_vars();
    vars.remove("TEXT_TO_SPEAK");
    let h = harness(vars, true, vec![], vec![], true).await;
    h.enter_call().await;

    wait_until("error mode written", || {
        h.switch.written_var(CHANNEL, "RECOGNITION_MODE").as_deref() == Some("ERROR")
    })
    .await;
    wait_until("script continued", || {
        h.switch.log().continued.contains(&CHANNEL.to_string())
    })
    .await;

    // No topology was ever built.
    assert!(h.switch.log().bridges_created.is_empty());

    h.exit_call().await;
}

#[tokio::test]
async fn test_internal_channels_are_answered_and_ignored() {
    let h = harness(base_vars(), true, vec![], vec![], true).await;
    h.engine
        .dispatch(SwitchEvent::ChannelEnter {
            channel: ChannelInfo {
                id: "snoop-leg".to_string(),
                caller_number: String::new(),
            },
            args: vec!["internal".to_string()],
        })
        .await;

    wait_until("internal channel answered", || {
        h.switch.log().answered.contains(&"snoop-leg".to_string())
    })
    .await;
    assert_eq!(h.engine.registry().active_calls(), 0);
    assert!(h.switch.log().bridges_created.is_empty());
}

#[tokio::test]
async fn test_bulk_variable_fallback_reads_per_name() {
    // The bulk getter is rejected; the session must fall back to
    // per-name reads and still find its configuration.
    let h = harness(base_vars(), false, vec![vec![6u8; 320]], vec![], true).await;
    h.enter_call().await;

    wait_until("prompt playing despite bulk failure", || {
        !h.switch.log().plays.is_empty()
    })
    .await;
    h.exit_call().await;
    wait_until("cleanup", || h.switch.log().bridges_destroyed.len() == 2).await;
}

#[tokio::test]
async fn test_double_exit_is_harmless() {
    let h = harness(base_vars(), true, vec![vec![7u8; 320]], vec![], true).await;
    h.enter_call().await;
    wait_until("prompt playing", || !h.switch.log().plays.is_empty()).await;

    h.exit_call().await;
    wait_until("cleanup", || h.switch.log().bridges_destroyed.len() == 2).await;

    // A second exit for the same channel routes nowhere and changes
    // nothing: resources are torn down exactly once.
    h.exit_call().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.switch.log().bridges_destroyed.len(), 2);
    assert_eq!(h.engine.registry().active_calls(), 0);
}
