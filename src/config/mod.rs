//! Configuration management for the Parley gateway
//!
//! Values resolve as environment variable, then config file, then default.

pub mod file;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::SessionConfig;
use crate::voice::{FRAME_LENGTH, GateConfig, RegisteredName, SAMPLE_RATE};
use crate::{Error, Result};

use file::ParleyConfigFile;

/// Default dialogue backend URL
pub const DEFAULT_DIALOGUE_URL: &str = "ws://127.0.0.1:8765/dialogue";

/// Parley gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Audio input format
    pub audio: AudioConfig,

    /// Registered wake names
    pub names: Vec<RegisteredName>,

    /// Wake word detection
    pub wake: WakeConfig,

    /// Voice activity gating and capture limits
    pub vad: VadConfig,

    /// Speech recognition
    pub stt: SttConfig,

    /// Speech synthesis
    pub tts: TtsConfig,

    /// Dialogue backend
    pub dialogue: DialogueConfig,

    /// Path to data directory (database)
    pub data_dir: PathBuf,

    /// `OpenAI` API key (for transcription and TTS)
    pub openai_api_key: Option<String>,
}

/// Audio input configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_length: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            frame_length: FRAME_LENGTH,
        }
    }
}

/// Wake word detection configuration
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Detection backend, only "process" is built into the binary
    pub backend: String,
    /// Detection server executable
    pub command: String,
    /// Leading arguments for the detection server
    pub args: Vec<String>,
    /// Default detection threshold
    pub threshold: f32,
    /// How long the server may take to load its models
    pub ready_timeout: Duration,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            backend: "process".to_string(),
            command: "openwakeword-server".to_string(),
            args: Vec::new(),
            threshold: crate::voice::DEFAULT_WAKE_THRESHOLD,
            ready_timeout: Duration::from_secs(30),
        }
    }
}

/// Voice probability engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadEngine {
    /// RMS energy heuristic
    #[default]
    Energy,
    /// Silero neural VAD
    Silero,
}

impl std::str::FromStr for VadEngine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "energy" => Ok(Self::Energy),
            "silero" => Ok(Self::Silero),
            other => Err(Error::Config(format!("unknown VAD engine: {other}"))),
        }
    }
}

/// Voice activity configuration
#[derive(Debug, Clone)]
pub struct VadConfig {
    pub engine: VadEngine,
    /// Hysteresis thresholds and durations
    pub gate: GateConfig,
    /// Abandon a capture when no speech starts within this time
    pub no_speech_timeout: Duration,
    /// Finalize a capture after this long regardless of silence
    pub max_utterance: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            engine: VadEngine::default(),
            gate: GateConfig::default(),
            no_speech_timeout: Duration::from_millis(5000),
            max_utterance: Duration::from_millis(30_000),
        }
    }
}

/// Speech recognition configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub base_url: String,
    pub model: String,
    pub language: Option<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            base_url: crate::voice::DEFAULT_API_BASE.to_string(),
            model: "whisper-1".to_string(),
            language: None,
        }
    }
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub base_url: String,
    pub model: String,
    pub voice: String,
    /// Speed multiplier (0.25 to 4.0)
    pub speed: f32,
    /// Speak the reply as it streams in
    pub streaming: bool,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: crate::voice::DEFAULT_API_BASE.to_string(),
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            speed: 1.0,
            streaming: false,
        }
    }
}

/// Dialogue backend configuration
#[derive(Debug, Clone)]
pub struct DialogueConfig {
    pub url: String,
    pub connect_timeout: Duration,
    /// Bound on each wait for the backend during a turn
    pub response_timeout: Duration,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DIALOGUE_URL.to_string(),
            connect_timeout: Duration::from_millis(10_000),
            response_timeout: Duration::from_millis(30_000),
        }
    }
}

impl Config {
    /// Load configuration from environment and config file
    ///
    /// `path` overrides the standard config file location.
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be interpreted
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = file::load_config_file(path);
        let base_dir = path
            .map(Path::to_path_buf)
            .or_else(file::config_file_path)
            .and_then(|p| p.parent().map(Path::to_path_buf));

        Self::from_sources(file, base_dir.as_deref(), |key| std::env::var(key).ok())
    }

    /// Assemble configuration from a parsed file and an environment lookup
    ///
    /// Relative model paths resolve against `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be interpreted
    pub fn from_sources(
        fc: ParleyConfigFile,
        base_dir: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let audio_defaults = AudioConfig::default();
        let audio = AudioConfig {
            sample_rate: fc.audio.sample_rate.unwrap_or(audio_defaults.sample_rate),
            frame_length: fc.audio.frame_length.unwrap_or(audio_defaults.frame_length),
        };

        let names = fc
            .names
            .into_iter()
            .map(|n| {
                let model = n.model.map(PathBuf::from).unwrap_or_default();
                let model = match base_dir {
                    Some(dir) if model.is_relative() && !model.as_os_str().is_empty() => {
                        dir.join(model)
                    }
                    _ => model,
                };
                RegisteredName {
                    label: n.label.unwrap_or_default(),
                    model,
                    persona: n.persona.unwrap_or_default(),
                    sensitivity: n.sensitivity,
                }
            })
            .collect();

        let wake_defaults = WakeConfig::default();
        let wake = WakeConfig {
            backend: fc.wake.backend.unwrap_or(wake_defaults.backend),
            command: env("PARLEY_WAKE_COMMAND")
                .or(fc.wake.command)
                .unwrap_or(wake_defaults.command),
            args: fc.wake.args.unwrap_or(wake_defaults.args),
            threshold: fc.wake.threshold.unwrap_or(wake_defaults.threshold),
            ready_timeout: fc
                .wake
                .ready_timeout_ms
                .map_or(wake_defaults.ready_timeout, Duration::from_millis),
        };

        let vad_defaults = VadConfig::default();
        let gate_defaults = vad_defaults.gate;
        let vad = VadConfig {
            engine: fc
                .vad
                .engine
                .as_deref()
                .map(str::parse)
                .transpose()?
                .unwrap_or(vad_defaults.engine),
            gate: GateConfig {
                voice_threshold: fc.vad.voice_threshold.unwrap_or(gate_defaults.voice_threshold),
                silence_threshold: fc
                    .vad
                    .silence_threshold
                    .unwrap_or(gate_defaults.silence_threshold),
                min_speech: fc
                    .vad
                    .min_speech_ms
                    .map_or(gate_defaults.min_speech, Duration::from_millis),
                silence: fc
                    .vad
                    .silence_ms
                    .map_or(gate_defaults.silence, Duration::from_millis),
            },
            no_speech_timeout: fc
                .vad
                .no_speech_timeout_ms
                .map_or(vad_defaults.no_speech_timeout, Duration::from_millis),
            max_utterance: fc
                .vad
                .max_utterance_ms
                .map_or(vad_defaults.max_utterance, Duration::from_millis),
        };

        let stt_defaults = SttConfig::default();
        let stt = SttConfig {
            base_url: fc.stt.base_url.unwrap_or(stt_defaults.base_url),
            model: env("PARLEY_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or(stt_defaults.model),
            language: fc.stt.language,
        };

        let tts_defaults = TtsConfig::default();
        let tts = TtsConfig {
            base_url: fc.tts.base_url.unwrap_or(tts_defaults.base_url),
            model: env("PARLEY_TTS_MODEL")
                .or(fc.tts.model)
                .unwrap_or(tts_defaults.model),
            voice: env("PARLEY_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or(tts_defaults.voice),
            speed: fc.tts.speed.unwrap_or(tts_defaults.speed),
            streaming: fc.tts.streaming.unwrap_or(tts_defaults.streaming),
        };

        let dialogue_defaults = DialogueConfig::default();
        let dialogue = DialogueConfig {
            url: env("PARLEY_DIALOGUE_URL")
                .or(fc.dialogue.url)
                .unwrap_or(dialogue_defaults.url),
            connect_timeout: fc
                .dialogue
                .connect_timeout_ms
                .map_or(dialogue_defaults.connect_timeout, Duration::from_millis),
            response_timeout: fc
                .dialogue
                .response_timeout_ms
                .map_or(dialogue_defaults.response_timeout, Duration::from_millis),
        };

        let data_dir = env("PARLEY_DATA_DIR")
            .or(fc.storage.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        Ok(Self {
            audio,
            names,
            wake,
            vad,
            stt,
            tts,
            dialogue,
            data_dir,
            openai_api_key: env("OPENAI_API_KEY").or(fc.api_keys.openai),
        })
    }

    /// Check the configuration can drive a voice session
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.names.is_empty() {
            return Err(Error::Config(
                "at least one [[names]] entry is required".to_string(),
            ));
        }

        let mut labels = HashSet::new();
        for name in &self.names {
            if name.label.trim().is_empty() {
                return Err(Error::Config("registered name without a label".to_string()));
            }
            if name.persona.trim().is_empty() {
                return Err(Error::Config(format!(
                    "name '{}' has no persona",
                    name.label
                )));
            }
            if !labels.insert(name.label.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate name label '{}'",
                    name.label
                )));
            }
            if let Some(s) = name.sensitivity
                && !(0.0..=1.0).contains(&s)
            {
                return Err(Error::Config(format!(
                    "sensitivity for '{}' must be within [0, 1], got {s}",
                    name.label
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.wake.threshold) {
            return Err(Error::Config(format!(
                "wake threshold must be within [0, 1], got {}",
                self.wake.threshold
            )));
        }

        if self.vad.gate.voice_threshold < self.vad.gate.silence_threshold {
            return Err(Error::Config(format!(
                "voice threshold {} is below silence threshold {}",
                self.vad.gate.voice_threshold, self.vad.gate.silence_threshold
            )));
        }

        if self.audio.frame_length == 0 {
            return Err(Error::Config("frame length must be positive".to_string()));
        }
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("sample rate must be positive".to_string()));
        }

        if self.openai_api_key.as_deref().is_none_or(str::is_empty) {
            return Err(Error::Config(
                "OPENAI_API_KEY is required for transcription and speech".to_string(),
            ));
        }

        Ok(())
    }

    /// Path of the fact database
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("parley.db")
    }

    /// Orchestrator settings
    #[must_use]
    pub const fn session(&self) -> SessionConfig {
        SessionConfig {
            gate: self.vad.gate,
            no_speech_timeout: self.vad.no_speech_timeout,
            max_utterance: self.vad.max_utterance,
            response_timeout: self.dialogue.response_timeout,
            streaming_tts: self.tts.streaming,
        }
    }
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".parley"),
        |d| d.data_local_dir().join("parley"),
    )
}
