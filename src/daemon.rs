//! Daemon - the main gateway service
//!
//! Builds every collaborator from [`Config`] and runs the session
//! orchestrator over live microphone frames until interrupted.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::VadEngine;
use crate::db::{self, FactStore, LAST_PERSONA_KEY, MemoryFactStore, SqliteFactStore};
use crate::dialogue::WebSocketDialogueClient;
use crate::session::{Components, Orchestrator};
use crate::voice::{
    AudioCapture, AudioPlayback, EnergyProbability, HttpRecognizer, HttpSynthesizer,
    ProcessSpotter, ProcessSpotterConfig, SileroProbability, VoiceProbability, WakeSpotter,
};
use crate::{Config, Error, Result};

/// Frames buffered between the capture callback and the orchestrator
const FRAME_QUEUE: usize = 64;

/// The Parley daemon - wires audio, wake words, and dialogue together
pub struct Daemon {
    config: Config,
    facts: Arc<dyn FactStore>,
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or storage cannot be opened
    pub fn new(config: Config, ephemeral: bool) -> Result<Self> {
        config.validate()?;
        let facts = open_fact_store(&config, ephemeral)?;
        Ok(Self { config, facts })
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if a collaborator cannot be started
    #[allow(clippy::future_not_send)]
    pub async fn run(self) -> Result<()> {
        let config = self.config;

        let spotter = build_spotter(&config).await?;
        let vad = build_vad(config.vad.engine, config.audio.sample_rate)?;

        let api_key = config.openai_api_key.clone().unwrap_or_default();
        let recognizer = HttpRecognizer::new(api_key.clone(), config.stt.model.clone())?
            .with_api_base(config.stt.base_url.clone())
            .with_language(config.stt.language.clone());
        let synthesizer = HttpSynthesizer::new(
            api_key,
            config.tts.model.clone(),
            config.tts.voice.clone(),
            config.tts.speed,
        )?
        .with_api_base(config.tts.base_url.clone());
        let sink = AudioPlayback::new()?;

        let last_persona = match self.facts.get(LAST_PERSONA_KEY) {
            Ok(persona) => persona,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read last persona");
                None
            }
        };
        if let Some(persona) = &last_persona {
            tracing::info!(persona, "restoring last persona");
        }

        let dialogue =
            WebSocketDialogueClient::new(config.dialogue.url.clone(), config.dialogue.connect_timeout)
                .with_initial_persona(last_persona);

        let mut orchestrator = Orchestrator::new(
            config.session(),
            Components {
                spotter,
                vad,
                recognizer: Box::new(recognizer),
                synthesizer: Box::new(synthesizer),
                sink: Box::new(sink),
                dialogue: Box::new(dialogue),
                facts: Arc::clone(&self.facts),
            },
        );

        let mut capture = AudioCapture::new(config.audio.sample_rate, config.audio.frame_length)?;
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE);
        capture.start(frames_tx)?;

        tracing::info!(
            names = ?config.names.iter().map(|n| n.label.as_str()).collect::<Vec<_>>(),
            dialogue = %config.dialogue.url,
            "parley gateway ready"
        );

        let result = orchestrator
            .run(ReceiverStream::new(frames_rx), shutdown_signal())
            .await;

        capture.stop();
        result
    }
}

/// Open the fact store under the data directory, or in memory
///
/// # Errors
///
/// Returns error if the database cannot be opened
pub fn open_fact_store(config: &Config, ephemeral: bool) -> Result<Arc<dyn FactStore>> {
    if ephemeral {
        tracing::debug!("using in-memory fact store");
        return Ok(Arc::new(MemoryFactStore::new()));
    }

    let path = config.database_path();
    let pool = db::init(&path)?;
    tracing::debug!(path = %path.display(), "fact store opened");
    Ok(Arc::new(SqliteFactStore::new(pool)))
}

/// Build the voice probability engine
///
/// # Errors
///
/// Returns error if the engine cannot be initialized
pub fn build_vad(engine: VadEngine, sample_rate: u32) -> Result<Box<dyn VoiceProbability>> {
    Ok(match engine {
        VadEngine::Energy => Box::new(EnergyProbability),
        VadEngine::Silero => Box::new(SileroProbability::new(sample_rate)?),
    })
}

async fn build_spotter(config: &Config) -> Result<Box<dyn WakeSpotter>> {
    if config.wake.backend != "process" {
        return Err(Error::Config(format!(
            "wake backend '{}' is not available in this build",
            config.wake.backend
        )));
    }

    let spotter_config = ProcessSpotterConfig {
        command: config.wake.command.clone(),
        args: config.wake.args.clone(),
        threshold: config.wake.threshold,
        frame_length: config.audio.frame_length,
        ready_timeout: config.wake.ready_timeout,
    };
    let names = config.names.clone();

    tracing::info!(command = %spotter_config.command, "starting wake word server");
    let spotter = tokio::task::spawn_blocking(move || ProcessSpotter::spawn(&spotter_config, names))
        .await
        .map_err(|e| Error::WakeWord(format!("wake word server startup panicked: {e}")))??;

    Ok(Box::new(spotter))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
