//! Stage C: per-name classification over a sliding window of embeddings

use std::collections::VecDeque;

use super::embedding::{Embedding, EmbeddingVector};
use super::{CLASSIFIER_STRIDE, NEUTRAL_SCORE, WINDOW_EMB};
use crate::Result;

/// What a classifier engine's raw output means
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreKind {
    /// Already a probability in [0, 1]
    #[default]
    Probability,
    /// Unbounded logit, squashed with the logistic function
    Logit,
}

/// Scores one window of embeddings
pub trait ClassifierEngine {
    /// Raw score for `window` (always `window` embeddings long)
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails to run
    fn classify(&mut self, window: &[EmbeddingVector]) -> Result<f32>;

    /// Interpretation of the raw score
    fn kind(&self) -> ScoreKind {
        ScoreKind::Probability
    }
}

/// Detection score for one registered name
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionScore {
    /// Registered name label the classifier belongs to
    pub label: String,
    /// Probability in [0, 1]
    pub score: f32,
    /// Stream index of the newest mel frame behind this score
    pub frame_index: u64,
}

/// Classification stage for a single registered name
pub struct ClassifierStage {
    label: String,
    engine: Box<dyn ClassifierEngine>,
    window: usize,
    stride: usize,
    buffer: VecDeque<Embedding>,
    emitted: u64,
}

impl ClassifierStage {
    /// Stage with the standard `WINDOW_EMB` window and a one-embedding slide
    #[must_use]
    pub fn new(label: impl Into<String>, engine: Box<dyn ClassifierEngine>) -> Self {
        Self::with_geometry(label, engine, WINDOW_EMB, CLASSIFIER_STRIDE)
    }

    /// Stage with a custom window and stride
    ///
    /// # Panics
    ///
    /// Panics if `stride` is zero or larger than `window`
    #[must_use]
    pub fn with_geometry(
        label: impl Into<String>,
        engine: Box<dyn ClassifierEngine>,
        window: usize,
        stride: usize,
    ) -> Self {
        assert!(stride > 0 && stride <= window, "stride must be in 1..=window");
        Self {
            label: label.into(),
            engine,
            window,
            stride,
            buffer: VecDeque::with_capacity(window + 1),
            emitted: 0,
        }
    }

    /// Append embeddings and emit every score that became computable
    pub fn push(&mut self, embeddings: &[Embedding]) -> Vec<DetectionScore> {
        let mut out = Vec::new();

        // Push one at a time so the buffer never holds more than one
        // window's worth plus the newest arrival
        for embedding in embeddings {
            self.buffer.push_back(*embedding);

            while self.buffer.len() >= self.window {
                let window: Vec<EmbeddingVector> = self
                    .buffer
                    .iter()
                    .take(self.window)
                    .map(|e| e.vector)
                    .collect();
                let frame_index = self.buffer[self.window - 1].end_frame;

                let score = match self.engine.classify(&window) {
                    Ok(raw) => squash(raw, self.engine.kind()),
                    Err(e) => {
                        tracing::warn!(label = %self.label, error = %e, "classifier failed, using neutral score");
                        NEUTRAL_SCORE
                    }
                };

                out.push(DetectionScore {
                    label: self.label.clone(),
                    score,
                    frame_index,
                });

                self.buffer.drain(..self.stride);
            }
        }

        self.emitted += out.len() as u64;
        out
    }

    /// Registered name label
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Embeddings waiting for the next window
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Total scores emitted since creation or reset
    #[must_use]
    pub const fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Drop buffered embeddings and counters
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.emitted = 0;
    }
}

/// Convert a raw engine score into a probability
///
/// Non-finite values collapse to the neutral score rather than propagating.
#[must_use]
pub fn squash(raw: f32, kind: ScoreKind) -> f32 {
    if !raw.is_finite() {
        return NEUTRAL_SCORE;
    }

    let probability = match kind {
        ScoreKind::Probability => raw,
        ScoreKind::Logit => 1.0 / (1.0 + (-raw).exp()),
    };

    if probability.is_finite() {
        probability.clamp(0.0, 1.0)
    } else {
        NEUTRAL_SCORE
    }
}
