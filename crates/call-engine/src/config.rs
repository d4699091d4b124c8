//! Process defaults and per-call effective configuration.
//!
//! The process starts from CLI flags and environment variables. Each
//! call then deep-clones those defaults and applies `APP_VAR_*` script
//! variables through a fixed mapping: every known key names a typed
//! field, unknown keys are warned about and ignored, and values that do
//! not parse are warned about and dropped. The result is immutable for
//! the lifetime of the call.

use std::collections::HashMap;
use std::str::FromStr;

use clap::Parser;
use tracing::warn;

use crate::error::{EngineError, Result};

/// When voice activity detection is switched on relative to the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadActivationMode {
    /// Arm once the first prompt chunk begins playing (barge-in over
    /// the whole prompt).
    AfterPromptStart,
    /// Arm only after the last prompt chunk finished playing.
    AfterPromptEnd,
}

impl FromStr for VadActivationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "after_prompt_start" => Ok(Self::AfterPromptStart),
            "after_prompt_end" => Ok(Self::AfterPromptEnd),
            other => Err(format!("unknown VAD activation mode: {other}")),
        }
    }
}

/// How the prompt audio is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// Synthesize `TEXT_TO_SPEAK` chunk by chunk.
    Tts,
    /// Play a pre-recorded file from disk.
    Playback,
}

impl FromStr for PromptMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "tts" => Ok(Self::Tts),
            "playback" => Ok(Self::Playback),
            other => Err(format!("unknown prompt mode: {other}")),
        }
    }
}

/// Process-level configuration, read once at startup.
#[derive(Parser, Debug, Clone)]
#[command(name = "voxgate", about = "Voice dialog gateway between an ARI switch and a cloud speech service")]
pub struct ProcessConfig {
    /// Base URL of the ARI HTTP interface
    #[arg(long, env = "ARI_URL", default_value = "http://127.0.0.1:8088")]
    pub ari_url: String,

    /// ARI username
    #[arg(long, env = "ARI_USERNAME", default_value = "asterisk")]
    pub ari_username: String,

    /// ARI password
    #[arg(long, env = "ARI_PASSWORD", default_value = "asterisk")]
    pub ari_password: String,

    /// Stasis application name registered with the switch
    #[arg(long, env = "ARI_APP_NAME", default_value = "voxgate")]
    pub ari_app_name: String,

    /// Azure Speech subscription key
    #[arg(long, env = "AZURE_SPEECH_SUBSCRIPTION_KEY", default_value = "")]
    pub azure_speech_subscription_key: String,

    /// Azure Speech region, e.g. westeurope
    #[arg(long, env = "AZURE_SPEECH_REGION", default_value = "")]
    pub azure_speech_region: String,

    /// Synthesis language
    #[arg(long, env = "AZURE_TTS_LANGUAGE", default_value = "es-ES")]
    pub azure_tts_language: String,

    /// Synthesis voice name
    #[arg(long, env = "AZURE_TTS_VOICE_NAME", default_value = "es-ES-ElviraNeural")]
    pub azure_tts_voice_name: String,

    /// Synthesis output format
    #[arg(long, env = "AZURE_TTS_OUTPUT_FORMAT", default_value = "raw-8khz-16bit-mono-pcm")]
    pub azure_tts_output_format: String,

    /// Recognition language
    #[arg(long, env = "AZURE_STT_LANGUAGE", default_value = "es-ES")]
    pub azure_stt_language: String,

    /// VAD activation mode: after_prompt_start or after_prompt_end
    #[arg(long, env = "VAD_ACTIVATION_MODE", default_value = "after_prompt_start")]
    pub vad_activation_mode: String,

    /// Delay in ms between prompt start and VAD arming
    #[arg(long, env = "VAD_ACTIVATION_DELAY_MS", default_value_t = 0)]
    pub vad_activation_delay_ms: u64,

    /// TALK_DETECT silence threshold in ms
    #[arg(long, env = "TALK_DETECT_SILENCE_THRESHOLD", default_value_t = 1200)]
    pub talk_detect_silence_threshold: u64,

    /// TALK_DETECT speech threshold in ms
    #[arg(long, env = "TALK_DETECT_SPEECH_THRESHOLD", default_value_t = 500)]
    pub talk_detect_speech_threshold: u64,

    /// Prompt mode: tts or playback
    #[arg(long, env = "PROMPT_MODE", default_value = "tts")]
    pub prompt_mode: String,

    /// Audio file played when prompt mode is playback
    #[arg(long, env = "PLAYBACK_FILE_PATH", default_value = "")]
    pub playback_file_path: String,

    /// Hard per-call session timeout in ms, 0 disables
    #[arg(long, env = "ARI_SESSION_TIMEOUT_MS", default_value_t = 300_000)]
    pub session_timeout_ms: u64,

    /// Timeout waiting for the first voice or keypad input in ms, 0 disables
    #[arg(long, env = "NO_INPUT_TIMEOUT_MS", default_value_t = 10_000)]
    pub no_input_timeout_ms: u64,

    /// Circular pre-buffer capacity in 20 ms frames
    #[arg(long, env = "RTP_PREBUFFER_SIZE", default_value_t = 100)]
    pub rtp_prebuffer_size: usize,

    /// Whether keypad input is accepted at all
    #[arg(long, env = "ENABLE_DTMF", default_value_t = true, action = clap::ArgAction::Set)]
    pub enable_dtmf: bool,

    /// Inter-digit timeout that completes keypad input, in ms
    #[arg(long, env = "DTMF_COMPLETION_TIMEOUT_MS", default_value_t = 2_000)]
    pub dtmf_completion_timeout_ms: u64,

    /// Local IP the RTP receiver binds and the switch sends media to
    #[arg(long, env = "EXTERNAL_MEDIA_SERVER_IP", default_value = "127.0.0.1")]
    pub external_media_server_ip: String,

    /// First candidate UDP port for the RTP receiver
    #[arg(long, env = "EXTERNAL_MEDIA_SERVER_PORT", default_value_t = 10_000)]
    pub external_media_server_port: u16,

    /// Wire format of the external media channel
    #[arg(long, env = "EXTERNAL_MEDIA_AUDIO_FORMAT", default_value = "ulaw")]
    pub external_media_audio_format: String,

    /// Default log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// SQLite URL for the interaction store
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:voxgate.db?mode=rwc")]
    pub database_url: String,

    /// Root directory for final call recordings
    #[arg(long, env = "RECORDINGS_DIR", default_value = "./recordings")]
    pub recordings_dir: String,
}

impl ProcessConfig {
    /// Build the per-call defaults, validating enumerations up front.
    pub fn to_effective(&self) -> Result<EffectiveConfig> {
        let vad_activation_mode = self
            .vad_activation_mode
            .parse::<VadActivationMode>()
            .map_err(EngineError::config)?;
        let prompt_mode = self
            .prompt_mode
            .parse::<PromptMode>()
            .map_err(EngineError::config)?;

        Ok(EffectiveConfig {
            ari_url: self.ari_url.clone(),
            ari_username: self.ari_username.clone(),
            ari_password: self.ari_password.clone(),
            ari_app_name: self.ari_app_name.clone(),
            azure_speech_subscription_key: self.azure_speech_subscription_key.clone(),
            azure_speech_region: self.azure_speech_region.clone(),
            azure_tts_language: self.azure_tts_language.clone(),
            azure_tts_voice_name: self.azure_tts_voice_name.clone(),
            azure_tts_output_format: self.azure_tts_output_format.clone(),
            azure_stt_language: self.azure_stt_language.clone(),
            vad_activation_mode,
            vad_activation_delay_ms: self.vad_activation_delay_ms,
            talk_detect_silence_threshold: self.talk_detect_silence_threshold,
            talk_detect_speech_threshold: self.talk_detect_speech_threshold,
            prompt_mode,
            playback_file_path: self.playback_file_path.clone(),
            session_timeout_ms: self.session_timeout_ms,
            no_input_timeout_ms: self.no_input_timeout_ms,
            rtp_prebuffer_size: self.rtp_prebuffer_size,
            enable_dtmf: self.enable_dtmf,
            dtmf_completion_timeout_ms: self.dtmf_completion_timeout_ms,
            external_media_server_ip: self.external_media_server_ip.clone(),
            external_media_server_port: self.external_media_server_port,
            external_media_audio_format: self.external_media_audio_format.clone(),
            log_level: self.log_level.clone(),
        })
    }
}

/// Per-call configuration: process defaults plus script overrides.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub ari_url: String,
    pub ari_username: String,
    pub ari_password: String,
    pub ari_app_name: String,
    pub azure_speech_subscription_key: String,
    pub azure_speech_region: String,
    pub azure_tts_language: String,
    pub azure_tts_voice_name: String,
    pub azure_tts_output_format: String,
    pub azure_stt_language: String,
    pub vad_activation_mode: VadActivationMode,
    pub vad_activation_delay_ms: u64,
    pub talk_detect_silence_threshold: u64,
    pub talk_detect_speech_threshold: u64,
    pub prompt_mode: PromptMode,
    pub playback_file_path: String,
    pub session_timeout_ms: u64,
    pub no_input_timeout_ms: u64,
    pub rtp_prebuffer_size: usize,
    pub enable_dtmf: bool,
    pub dtmf_completion_timeout_ms: u64,
    pub external_media_server_ip: String,
    pub external_media_server_port: u16,
    pub external_media_audio_format: String,
    pub log_level: String,
}

/// Script variables a call may override, also the fallback fetch list
/// when the bulk variable getter is unavailable.
pub const SCRIPT_VAR_ALLOW_LIST: &[&str] = &[
    "TEXT_TO_SPEAK",
    "APP_VAR_ARI_URL",
    "APP_VAR_ARI_USERNAME",
    "APP_VAR_ARI_PASSWORD",
    "APP_VAR_ARI_APP_NAME",
    "APP_VAR_AZURE_SPEECH_SUBSCRIPTION_KEY",
    "APP_VAR_AZURE_SPEECH_REGION",
    "APP_VAR_AZURE_TTS_LANGUAGE",
    "APP_VAR_AZURE_TTS_VOICE_NAME",
    "APP_VAR_AZURE_TTS_OUTPUT_FORMAT",
    "APP_VAR_AZURE_STT_LANGUAGE",
    "APP_VAR_VAD_ACTIVATION_MODE",
    "APP_VAR_VAD_ACTIVATION_DELAY_MS",
    "APP_VAR_TALK_DETECT_SILENCE_THRESHOLD",
    "APP_VAR_TALK_DETECT_SPEECH_THRESHOLD",
    "APP_VAR_PROMPT_MODE",
    "APP_VAR_PLAYBACK_FILE_PATH",
    "APP_VAR_ARI_SESSION_TIMEOUT_MS",
    "APP_VAR_NO_INPUT_TIMEOUT_MS",
    "APP_VAR_RTP_PREBUFFER_SIZE",
    "APP_VAR_ENABLE_DTMF",
    "APP_VAR_DTMF_COMPLETION_TIMEOUT_MS",
    "APP_VAR_EXTERNAL_MEDIA_SERVER_IP",
    "APP_VAR_EXTERNAL_MEDIA_SERVER_PORT",
    "APP_VAR_EXTERNAL_MEDIA_AUDIO_FORMAT",
    "APP_VAR_LOG_LEVEL",
];

impl EffectiveConfig {
    /// Apply `APP_VAR_*` script variables on top of the defaults.
    ///
    /// Unknown `APP_VAR_` keys are warned about and ignored; values that
    /// fail to parse are warned about and dropped. Variables without the
    /// prefix are other people's business and skipped silently.
    pub fn apply_script_overrides(&mut self, vars: &HashMap<String, String>) {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix("APP_VAR_") else {
                continue;
            };
            match name {
                "ARI_URL" => self.ari_url = value.clone(),
                "ARI_USERNAME" => self.ari_username = value.clone(),
                "ARI_PASSWORD" => self.ari_password = value.clone(),
                "ARI_APP_NAME" => self.ari_app_name = value.clone(),
                "AZURE_SPEECH_SUBSCRIPTION_KEY" => {
                    self.azure_speech_subscription_key = value.clone()
                }
                "AZURE_SPEECH_REGION" => self.azure_speech_region = value.clone(),
                "AZURE_TTS_LANGUAGE" => self.azure_tts_language = value.clone(),
                "AZURE_TTS_VOICE_NAME" => self.azure_tts_voice_name = value.clone(),
                "AZURE_TTS_OUTPUT_FORMAT" => self.azure_tts_output_format = value.clone(),
                "AZURE_STT_LANGUAGE" => self.azure_stt_language = value.clone(),
                "VAD_ACTIVATION_MODE" => {
                    apply_parsed(name, value, &mut self.vad_activation_mode)
                }
                "VAD_ACTIVATION_DELAY_MS" => {
                    apply_parsed(name, value, &mut self.vad_activation_delay_ms)
                }
                "TALK_DETECT_SILENCE_THRESHOLD" => {
                    apply_parsed(name, value, &mut self.talk_detect_silence_threshold)
                }
                "TALK_DETECT_SPEECH_THRESHOLD" => {
                    apply_parsed(name, value, &mut self.talk_detect_speech_threshold)
                }
                "PROMPT_MODE" => apply_parsed(name, value, &mut self.prompt_mode),
                "PLAYBACK_FILE_PATH" => self.playback_file_path = value.clone(),
                "ARI_SESSION_TIMEOUT_MS" => {
                    apply_parsed(name, value, &mut self.session_timeout_ms)
                }
                "NO_INPUT_TIMEOUT_MS" => apply_parsed(name, value, &mut self.no_input_timeout_ms),
                "RTP_PREBUFFER_SIZE" => apply_parsed(name, value, &mut self.rtp_prebuffer_size),
                "ENABLE_DTMF" => match parse_bool(value) {
                    Some(parsed) => self.enable_dtmf = parsed,
                    None => warn!(name, value, "dropping unparsable boolean override"),
                },
                "DTMF_COMPLETION_TIMEOUT_MS" => {
                    apply_parsed(name, value, &mut self.dtmf_completion_timeout_ms)
                }
                "EXTERNAL_MEDIA_SERVER_IP" => self.external_media_server_ip = value.clone(),
                "EXTERNAL_MEDIA_SERVER_PORT" => {
                    apply_parsed(name, value, &mut self.external_media_server_port)
                }
                "EXTERNAL_MEDIA_AUDIO_FORMAT" => {
                    self.external_media_audio_format = value.clone()
                }
                "LOG_LEVEL" => self.log_level = value.clone(),
                unknown => warn!(key = unknown, "ignoring unknown APP_VAR override"),
            }
        }
    }

    /// Positional TALK_DETECT argument string the switch expects.
    pub fn talk_detect_args(&self) -> String {
        format!(
            "{},{}",
            self.talk_detect_silence_threshold, self.talk_detect_speech_threshold
        )
    }
}

fn apply_parsed<T>(name: &str, value: &str, target: &mut T)
where
    T: FromStr,
{
    match value.parse::<T>() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!(name, value, "dropping unparsable override"),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> EffectiveConfig {
        ProcessConfig::parse_from(["voxgate"]).to_effective().unwrap()
    }

    #[test]
    fn test_defaults_parse() {
        let config = defaults();
        assert_eq!(config.vad_activation_mode, VadActivationMode::AfterPromptStart);
        assert_eq!(config.prompt_mode, PromptMode::Tts);
        assert_eq!(config.rtp_prebuffer_size, 100);
        assert!(config.enable_dtmf);
    }

    #[test]
    fn test_overrides_apply_typed_values() {
        let mut config = defaults();
        let vars = HashMap::from([
            ("APP_VAR_VAD_ACTIVATION_MODE".to_string(), "after_prompt_end".to_string()),
            ("APP_VAR_NO_INPUT_TIMEOUT_MS".to_string(), "3000".to_string()),
            ("APP_VAR_ENABLE_DTMF".to_string(), "false".to_string()),
            ("APP_VAR_RTP_PREBUFFER_SIZE".to_string(), "64".to_string()),
            ("APP_VAR_AZURE_STT_LANGUAGE".to_string(), "en-US".to_string()),
        ]);
        config.apply_script_overrides(&vars);

        assert_eq!(config.vad_activation_mode, VadActivationMode::AfterPromptEnd);
        assert_eq!(config.no_input_timeout_ms, 3000);
        assert!(!config.enable_dtmf);
        assert_eq!(config.rtp_prebuffer_size, 64);
        assert_eq!(config.azure_stt_language, "en-US");
    }

    #[test]
    fn test_unparsable_values_are_dropped() {
        let mut config = defaults();
        let before_timeout = config.no_input_timeout_ms;
        let vars = HashMap::from([
            ("APP_VAR_NO_INPUT_TIMEOUT_MS".to_string(), "soon".to_string()),
            ("APP_VAR_VAD_ACTIVATION_MODE".to_string(), "whenever".to_string()),
            ("APP_VAR_ENABLE_DTMF".to_string(), "maybe".to_string()),
        ]);
        config.apply_script_overrides(&vars);

        assert_eq!(config.no_input_timeout_ms, before_timeout);
        assert_eq!(config.vad_activation_mode, VadActivationMode::AfterPromptStart);
        assert!(config.enable_dtmf);
    }

    #[test]
    fn test_unknown_and_foreign_keys_ignored() {
        let mut config = defaults();
        let vars = HashMap::from([
            ("APP_VAR_FLUX_CAPACITOR".to_string(), "88".to_string()),
            ("TEXT_TO_SPEAK".to_string(), "hola".to_string()),
            ("CHANNEL(language)".to_string(), "es".to_string()),
        ]);
        // Must not panic and must not change anything
        let before = format!("{config:?}");
        config.apply_script_overrides(&vars);
        assert_eq!(before, format!("{config:?}"));
    }

    #[test]
    fn test_talk_detect_args_are_positional_silence_first() {
        let mut config = defaults();
        config.talk_detect_silence_threshold = 1200;
        config.talk_detect_speech_threshold = 500;
        assert_eq!(config.talk_detect_args(), "1200,500");
    }

    #[test]
    fn test_invalid_enum_at_startup_is_fatal() {
        let process = ProcessConfig::parse_from(["voxgate", "--vad-activation-mode", "sometimes"]);
        assert!(process.to_effective().is_err());
    }
}
