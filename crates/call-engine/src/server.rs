//! Process startup and lifecycle.
//!
//! Startup is fail-fast: if the switch event stream cannot be
//! established or the cloud speech credentials are unusable, the process
//! exits non-zero before taking any call. After that the server simply
//! pumps switch events into the engine until an interrupt arrives.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use voxgate_speech_core::azure::{AzureRecognizer, AzureSpeechConfig, AzureSynthesizer};
use voxgate_speech_core::{Recognizer, Synthesizer};

use crate::config::ProcessConfig;
use crate::database::DatabaseManager;
use crate::error::{EngineError, Result};
use crate::orchestrator::{Engine, EngineContext};
use crate::prompt::PromptCache;
use crate::recordings::RecordingStore;
use crate::switch::ari::{AriClient, AriConfig};
use crate::switch::SwitchEvent;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured default level.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// A started voxgate process: connected to the switch, schema ensured,
/// caches and recording directories in place.
pub struct Server {
    engine: Engine,
    events: mpsc::Receiver<SwitchEvent>,
}

impl Server {
    /// Stand the process up. Any error here is fatal.
    pub async fn start(config: ProcessConfig) -> Result<Self> {
        let defaults = config.to_effective()?;

        let azure = AzureSpeechConfig {
            subscription_key: defaults.azure_speech_subscription_key.clone(),
            region: defaults.azure_speech_region.clone(),
            stt_language: defaults.azure_stt_language.clone(),
            tts_language: defaults.azure_tts_language.clone(),
            tts_voice: defaults.azure_tts_voice_name.clone(),
            tts_output_format: defaults.azure_tts_output_format.clone(),
        };
        let synthesizer = Synthesizer::new(Arc::new(
            AzureSynthesizer::new(azure.clone())
                .map_err(|e| EngineError::config(e.to_string()))?,
        ));
        let recognizer = Recognizer::new(Arc::new(
            AzureRecognizer::new(azure).map_err(|e| EngineError::config(e.to_string()))?,
        ));

        let cache = PromptCache::init().await?;
        let recordings = RecordingStore::init(&config.recordings_dir).await?;
        let database = DatabaseManager::new(&config.database_url).await?;
        info!("🗄️ interaction store ready");

        let (ari, events) = AriClient::connect(AriConfig {
            url: defaults.ari_url.clone(),
            username: defaults.ari_username.clone(),
            password: defaults.ari_password.clone(),
            app_name: defaults.ari_app_name.clone(),
        })
        .await?;

        let context = Arc::new(EngineContext {
            defaults,
            cache,
            recordings,
            database,
            synthesizer,
            recognizer,
        });
        let engine = Engine::new(Arc::new(ari), context);
        info!("📞 voxgate ready, waiting for calls");

        Ok(Self { engine, events })
    }

    /// Pump switch events until the stream closes or an interrupt
    /// arrives. Returns cleanly on interrupt so the process exits zero.
    pub async fn run(self) {
        let Self { engine, events } = self;
        tokio::select! {
            _ = engine.run(events) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
            }
        }
    }
}
