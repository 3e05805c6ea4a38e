//! Shared test utilities
//!
//! Scripted stand-ins for every collaborator the orchestrator drives. All
//! fakes report what they were asked to do through a shared [`Recorder`].

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};

use parley_gateway::db::{FactStore, MemoryFactStore};
use parley_gateway::dialogue::DialogueClient;
use parley_gateway::session::{Components, Orchestrator, SessionConfig};
use parley_gateway::voice::{
    AudioBuffer, AudioSink, FRAME_LENGTH, Frame, Recognizer, RecognizerUpdate, SAMPLE_RATE,
    Synthesizer, VoiceProbability, WakeDetection, WakeSpotter,
};
use parley_gateway::{Error, Result};

/// Everything the fakes observed
#[derive(Debug, Default)]
pub struct Calls {
    pub spotted: Vec<u64>,
    pub recognized: Vec<u64>,
    pub recognizer_flushes: usize,
    pub spotter_resets: usize,
    pub switches: Vec<String>,
    pub turns: Vec<String>,
    pub synthesized: Vec<String>,
    pub played: usize,
    pub written: usize,
    pub sink_flushes: usize,
}

pub type Recorder = Arc<Mutex<Calls>>;

/// A silent frame with the given sequence number (80 ms at 16 kHz)
#[must_use]
pub fn frame(sequence: u64) -> Frame {
    Frame::new(vec![0; FRAME_LENGTH], SAMPLE_RATE, sequence)
}

#[must_use]
pub fn detection(label: &str, persona: &str) -> WakeDetection {
    WakeDetection {
        label: label.to_string(),
        persona: persona.to_string(),
        score: 0.9,
        sequence: 0,
    }
}

/// Detects configured names on configured frames
#[derive(Default)]
pub struct ScriptedSpotter {
    pub detections: HashMap<u64, WakeDetection>,
    pub failures: HashSet<u64>,
    pub recorder: Recorder,
}

impl WakeSpotter for ScriptedSpotter {
    fn process(&mut self, frame: &Frame) -> Result<Option<WakeDetection>> {
        self.recorder.lock().unwrap().spotted.push(frame.sequence);
        if self.failures.contains(&frame.sequence) {
            return Err(Error::WakeWord("scripted failure".to_string()));
        }
        Ok(self.detections.get(&frame.sequence).cloned())
    }

    fn reset(&mut self) {
        self.recorder.lock().unwrap().spotter_resets += 1;
    }

    fn labels(&self) -> Vec<String> {
        self.detections.values().map(|d| d.label.clone()).collect()
    }
}

/// Voice probability by frame sequence
pub struct ScriptedVad {
    pub probabilities: HashMap<u64, f32>,
    pub default: f32,
    pub failures: HashSet<u64>,
}

impl ScriptedVad {
    /// Speech on `speech` frames, silence everywhere else
    #[must_use]
    pub fn speech(speech: std::ops::RangeInclusive<u64>) -> Self {
        Self {
            probabilities: speech.map(|s| (s, 0.9)).collect(),
            default: 0.05,
            failures: HashSet::new(),
        }
    }
}

impl VoiceProbability for ScriptedVad {
    fn probability(&mut self, frame: &Frame) -> Result<f32> {
        if self.failures.contains(&frame.sequence) {
            return Err(Error::Vad("scripted failure".to_string()));
        }
        Ok(self
            .probabilities
            .get(&frame.sequence)
            .copied()
            .unwrap_or(self.default))
    }
}

/// Emits partials on configured frames and a fixed text on flush
#[derive(Default)]
pub struct ScriptedRecognizer {
    pub partials: HashMap<u64, String>,
    pub endpoint_at: Option<u64>,
    pub failures: HashSet<u64>,
    pub flush_text: String,
    pub hang_on_flush: bool,
    pub recorder: Recorder,
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn process(&mut self, frame: &Frame) -> Result<RecognizerUpdate> {
        self.recorder.lock().unwrap().recognized.push(frame.sequence);
        if self.failures.contains(&frame.sequence) {
            return Err(Error::Stt("scripted failure".to_string()));
        }
        Ok(RecognizerUpdate {
            partial: self.partials.get(&frame.sequence).cloned(),
            endpoint: self.endpoint_at == Some(frame.sequence),
        })
    }

    async fn flush(&mut self) -> Result<String> {
        self.recorder.lock().unwrap().recognizer_flushes += 1;
        if self.hang_on_flush {
            std::future::pending::<()>().await;
        }
        Ok(self.flush_text.clone())
    }

    fn reset(&mut self) {}
}

/// Records every text it is asked to speak
pub struct RecordingSynthesizer {
    pub hangs: bool,
    pub recorder: Recorder,
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioBuffer> {
        self.recorder.lock().unwrap().synthesized.push(text.to_string());
        if self.hangs {
            std::future::pending::<()>().await;
        }
        Ok(AudioBuffer::new(vec![0; 240], 24000))
    }
}

/// Counts playback calls
pub struct RecordingSink {
    pub recorder: Recorder,
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&mut self, _audio: AudioBuffer) -> Result<()> {
        self.recorder.lock().unwrap().played += 1;
        Ok(())
    }

    async fn write(&mut self, _audio: AudioBuffer) -> Result<()> {
        self.recorder.lock().unwrap().written += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.recorder.lock().unwrap().sink_flushes += 1;
        Ok(())
    }
}

/// How the scripted backend answers a turn
#[derive(Debug, Clone)]
pub enum Reply {
    /// Stream these increments, then end
    Increments(Vec<String>),
    /// Stream these increments, then fail
    FailAfter(Vec<String>, String),
    /// Never answer
    Hang,
}

/// Dialogue backend that answers from a script
pub struct ScriptedDialogue {
    pub selected: Option<String>,
    pub reply: Reply,
    /// Wait before the first increment
    pub delay: Duration,
    pub hang_on_switch: bool,
    pub recorder: Recorder,
}

impl ScriptedDialogue {
    #[must_use]
    pub fn replying(increments: &[&str], recorder: Recorder) -> Self {
        Self {
            selected: None,
            reply: Reply::Increments(increments.iter().map(ToString::to_string).collect()),
            delay: Duration::ZERO,
            hang_on_switch: false,
            recorder,
        }
    }
}

#[async_trait]
impl DialogueClient for ScriptedDialogue {
    fn selected_persona(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    async fn switch_persona(&mut self, persona: &str) -> Result<()> {
        self.recorder.lock().unwrap().switches.push(persona.to_string());
        if self.hang_on_switch {
            std::future::pending::<()>().await;
        }
        self.selected = Some(persona.to_string());
        Ok(())
    }

    async fn submit_turn<'a>(
        &'a mut self,
        text: &str,
    ) -> Result<BoxStream<'a, Result<String>>> {
        self.recorder.lock().unwrap().turns.push(text.to_string());

        let items: Vec<Result<String>> = match &self.reply {
            Reply::Hang => return Ok(stream::pending().boxed()),
            Reply::Increments(increments) => increments.iter().cloned().map(Ok).collect(),
            Reply::FailAfter(increments, message) => increments
                .iter()
                .cloned()
                .map(Ok)
                .chain(std::iter::once(Err(Error::Dialogue(message.clone()))))
                .collect(),
        };

        let delay = self.delay;
        Ok(stream::once(async move {
            tokio::time::sleep(delay).await;
            stream::iter(items)
        })
        .flatten()
        .boxed())
    }

    async fn list_personas(&mut self) -> Result<Vec<String>> {
        Ok(self.selected.iter().cloned().collect())
    }
}

/// Fact store whose writes always fail
pub struct FailingFactStore;

impl FactStore for FailingFactStore {
    fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(Error::Database("disk full".to_string()))
    }
}

/// Builder for an orchestrator wired to fakes
pub struct Harness {
    pub config: SessionConfig,
    pub spotter: ScriptedSpotter,
    pub vad: ScriptedVad,
    pub recognizer: ScriptedRecognizer,
    pub dialogue: ScriptedDialogue,
    pub synthesis_hangs: bool,
    pub facts: Arc<dyn FactStore>,
    pub recorder: Recorder,
}

impl Harness {
    /// Wake on frame 0 for "luna", speech on frames 1..=10, silence after
    #[must_use]
    pub fn new() -> Self {
        let recorder = Recorder::default();
        Self {
            config: SessionConfig::default(),
            spotter: ScriptedSpotter {
                detections: HashMap::from([(0, detection("luna", "luna"))]),
                failures: HashSet::new(),
                recorder: Arc::clone(&recorder),
            },
            vad: ScriptedVad::speech(1..=10),
            recognizer: ScriptedRecognizer {
                flush_text: "hello there".to_string(),
                recorder: Arc::clone(&recorder),
                ..ScriptedRecognizer::default()
            },
            dialogue: ScriptedDialogue::replying(&["Hi", " there!"], Arc::clone(&recorder)),
            synthesis_hangs: false,
            facts: Arc::new(MemoryFactStore::new()),
            recorder,
        }
    }

    #[must_use]
    pub fn build(self) -> (Orchestrator, Recorder) {
        let recorder = self.recorder;
        let orchestrator = Orchestrator::new(
            self.config,
            Components {
                spotter: Box::new(self.spotter),
                vad: Box::new(self.vad),
                recognizer: Box::new(self.recognizer),
                synthesizer: Box::new(RecordingSynthesizer {
                    hangs: self.synthesis_hangs,
                    recorder: Arc::clone(&recorder),
                }),
                sink: Box::new(RecordingSink {
                    recorder: Arc::clone(&recorder),
                }),
                dialogue: Box::new(self.dialogue),
                facts: self.facts,
            },
        );
        (orchestrator, recorder)
    }
}
