//! Wake word detection
//!
//! A [`WakeSpotter`] classifies each frame as "no detection" or one of the
//! registered names. Two backends exist: [`PipelineSpotter`] runs the
//! windowed feature pipeline in-process, [`super::ProcessSpotter`] streams
//! frames to an external detection server.

use std::path::PathBuf;

use super::frame::Frame;
use crate::pipeline::{CHUNK_SAMPLES, DetectionScore, SAMPLE_RATE, StreamingPipeline};
use crate::{Error, Result};

/// Default detection threshold when a name has no sensitivity of its own
pub const DEFAULT_WAKE_THRESHOLD: f32 = 0.5;

/// A spoken name the assistant answers to
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredName {
    /// Keyword label (e.g. "luna")
    pub label: String,
    /// Spotting model file
    pub model: PathBuf,
    /// Dialogue persona this name routes to
    pub persona: String,
    /// Per-name detection threshold override
    pub sensitivity: Option<f32>,
}

impl RegisteredName {
    /// Effective detection threshold
    #[must_use]
    pub fn threshold(&self, default: f32) -> f32 {
        self.sensitivity.unwrap_or(default)
    }

    /// Whether a model name reported by an engine refers to this name
    ///
    /// Matches the label or the model file stem, case-insensitively.
    #[must_use]
    pub fn matches_model(&self, model: &str) -> bool {
        let model = model.trim();
        self.label.eq_ignore_ascii_case(model)
            || self
                .model
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|stem| stem.eq_ignore_ascii_case(model))
    }
}

/// A registered name was heard
#[derive(Debug, Clone, PartialEq)]
pub struct WakeDetection {
    /// Label of the detected name
    pub label: String,
    /// Persona the name routes to
    pub persona: String,
    /// Detection score in [0, 1]
    pub score: f32,
    /// Sequence index of the frame that triggered the detection
    pub sequence: u64,
}

/// Per-frame wake word classifier
pub trait WakeSpotter {
    /// Classify one frame
    ///
    /// # Errors
    ///
    /// Returns error if the underlying engine fails; callers treat this as
    /// "no detection" for the frame
    fn process(&mut self, frame: &Frame) -> Result<Option<WakeDetection>>;

    /// Discard buffered audio so stale windows cannot trigger
    fn reset(&mut self);

    /// Labels this spotter can report
    fn labels(&self) -> Vec<String>;
}

/// Wake spotter backed by the in-process streaming feature pipeline
pub struct PipelineSpotter {
    pipeline: StreamingPipeline,
    names: Vec<RegisteredName>,
    default_threshold: f32,
    pending: Vec<i16>,
}

impl PipelineSpotter {
    /// Create a spotter over a pipeline whose classifiers are labelled
    /// with the registered names
    ///
    /// # Errors
    ///
    /// Returns error if a classifier label has no registered name
    pub fn new(
        pipeline: StreamingPipeline,
        names: Vec<RegisteredName>,
        default_threshold: f32,
    ) -> Result<Self> {
        for label in pipeline.labels() {
            if !names.iter().any(|n| n.label == label) {
                return Err(Error::Config(format!(
                    "classifier '{label}' has no registered name"
                )));
            }
        }

        tracing::debug!(
            names = ?names.iter().map(|n| n.label.as_str()).collect::<Vec<_>>(),
            "pipeline wake spotter initialized"
        );

        Ok(Self {
            pipeline,
            names,
            default_threshold,
            pending: Vec::with_capacity(CHUNK_SAMPLES * 2),
        })
    }

    /// The underlying pipeline
    #[must_use]
    pub const fn pipeline(&self) -> &StreamingPipeline {
        &self.pipeline
    }

    fn threshold_for(&self, label: &str) -> f32 {
        self.names
            .iter()
            .find(|n| n.label == label)
            .map_or(self.default_threshold, |n| n.threshold(self.default_threshold))
    }

    fn best_detection(&self, scores: &[DetectionScore], sequence: u64) -> Option<WakeDetection> {
        scores
            .iter()
            .filter(|s| s.score >= self.threshold_for(&s.label))
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .and_then(|best| {
                let name = self.names.iter().find(|n| n.label == best.label)?;
                Some(WakeDetection {
                    label: name.label.clone(),
                    persona: name.persona.clone(),
                    score: best.score,
                    sequence,
                })
            })
    }
}

impl WakeSpotter for PipelineSpotter {
    fn process(&mut self, frame: &Frame) -> Result<Option<WakeDetection>> {
        if frame.sample_rate != SAMPLE_RATE {
            return Err(Error::WakeWord(format!(
                "pipeline expects {SAMPLE_RATE} Hz audio, got {} Hz",
                frame.sample_rate
            )));
        }

        self.pending.extend_from_slice(&frame.samples);

        let mut scores = Vec::new();
        while self.pending.len() >= CHUNK_SAMPLES {
            let chunk: Vec<i16> = self.pending.drain(..CHUNK_SAMPLES).collect();
            scores.extend(self.pipeline.process_chunk(&chunk));
        }

        let detection = self.best_detection(&scores, frame.sequence);
        if let Some(d) = &detection {
            tracing::info!(label = %d.label, score = d.score, "wake word detected");
        }
        Ok(detection)
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.pipeline.reset();
    }

    fn labels(&self) -> Vec<String> {
        self.names.iter().map(|n| n.label.clone()).collect()
    }
}
