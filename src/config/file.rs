//! TOML configuration file loading
//!
//! Supports `~/.config/parley/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ParleyConfigFile {
    /// Audio input format
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Registered wake names
    #[serde(default)]
    pub names: Vec<NameFileConfig>,

    /// Wake word detection server
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Voice activity gate
    #[serde(default)]
    pub vad: VadFileConfig,

    /// Speech recognition
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Speech synthesis
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Dialogue backend
    #[serde(default)]
    pub dialogue: DialogueFileConfig,

    /// Local storage
    #[serde(default)]
    pub storage: StorageFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Audio input configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub sample_rate: Option<u32>,
    /// Samples per frame
    pub frame_length: Option<usize>,
}

/// One `[[names]]` entry
#[derive(Debug, Default, Deserialize)]
pub struct NameFileConfig {
    /// Spoken keyword label (e.g. "luna")
    pub label: Option<String>,
    /// Spotting model path, relative paths resolve against the config file
    pub model: Option<String>,
    /// Dialogue persona the name routes to
    pub persona: Option<String>,
    /// Detection threshold override
    pub sensitivity: Option<f32>,
}

/// Wake word detection configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    /// Detection backend ("process")
    pub backend: Option<String>,
    /// Detection server executable
    pub command: Option<String>,
    /// Leading arguments for the detection server
    pub args: Option<Vec<String>>,
    /// Default detection threshold
    pub threshold: Option<f32>,
    pub ready_timeout_ms: Option<u64>,
}

/// Voice activity configuration
#[derive(Debug, Default, Deserialize)]
pub struct VadFileConfig {
    /// Probability engine ("energy" or "silero")
    pub engine: Option<String>,
    pub voice_threshold: Option<f32>,
    pub silence_threshold: Option<f32>,
    pub min_speech_ms: Option<u64>,
    pub silence_ms: Option<u64>,
    pub no_speech_timeout_ms: Option<u64>,
    pub max_utterance_ms: Option<u64>,
}

/// Speech recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// OpenAI-compatible API base
    pub base_url: Option<String>,
    /// STT model (e.g. "whisper-1")
    pub model: Option<String>,
    /// Spoken language hint
    pub language: Option<String>,
}

/// Speech synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// OpenAI-compatible API base
    pub base_url: Option<String>,
    /// TTS model (e.g. "tts-1")
    pub model: Option<String>,
    /// TTS voice identifier (e.g. "alloy")
    pub voice: Option<String>,
    /// TTS speed multiplier
    pub speed: Option<f32>,
    /// Speak the reply sentence by sentence as it streams in
    pub streaming: Option<bool>,
}

/// Dialogue backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct DialogueFileConfig {
    /// WebSocket URL
    pub url: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub response_timeout_ms: Option<u64>,
}

/// Storage configuration
#[derive(Debug, Default, Deserialize)]
pub struct StorageFileConfig {
    /// Data directory (database)
    pub data_dir: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
}

/// Load the TOML config file
///
/// Reads `path` when given, otherwise the standard location. Returns
/// `ParleyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file(path: Option<&Path>) -> ParleyConfigFile {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return ParleyConfigFile::default();
    };

    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file");
        return ParleyConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ParleyConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ParleyConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/parley/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("parley").join("config.toml"))
}
