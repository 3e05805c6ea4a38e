//! Streaming feature pipeline for neural wake word spotting
//!
//! Three cascaded stages turn a continuous chunked audio stream into a
//! per-name detection score stream:
//!
//! ```text
//! chunk (1280 samples) ──► Stage A ──► mel frames (32 bins, small burst)
//!                                          │
//!              ┌───────────────────────────┘
//!              ▼
//!          Stage B: window 76 mel frames, slide 8  ──► embedding (96)
//!                                                        │
//!              ┌─────────────────────────────────────────┘
//!              ▼
//!          Stage C: window 16 embeddings, slide 1  ──► score [0, 1]
//! ```
//!
//! Every call drains all windows it can produce before returning, and
//! slides are applied oldest-first. Stage C sliding by one embedding
//! (not by a whole window) is what gives a new score on every embedding;
//! changing it does not fail loudly, it just makes detection late and
//! jumpy.
//!
//! Stages A and B are shared; each registered name gets its own Stage C.

pub mod classifier;
pub mod embedding;
pub mod features;

pub use classifier::{ClassifierEngine, ClassifierStage, DetectionScore, ScoreKind, squash};
pub use embedding::{Embedding, EmbeddingEngine, EmbeddingStage, EmbeddingVector};
pub use features::{DEFAULT_FRAMES_PER_CHUNK, FeatureStage, MelEngine, MelFrame};

/// Audio sample rate the models expect
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per Stage A chunk (80ms at 16kHz)
pub const CHUNK_SAMPLES: usize = 1280;

/// Coefficients per mel frame
pub const MEL_BINS: usize = 32;

/// Mel frames consumed per embedding
pub const WINDOW_MEL: usize = 76;

/// Mel frames discarded between successive embeddings
pub const STRIDE_MEL: usize = 8;

/// Values per embedding vector
pub const EMBEDDING_DIM: usize = 96;

/// Embeddings consumed per score
pub const WINDOW_EMB: usize = 16;

/// Embeddings discarded between successive scores
pub const CLASSIFIER_STRIDE: usize = 1;

/// Mel frames behind a single score
pub const RECEPTIVE_FIELD_MEL: usize = WINDOW_MEL + (WINDOW_EMB - 1) * STRIDE_MEL;

/// Mel normalization multiplier (applied first)
pub const MEL_SCALE: f32 = 0.1;

/// Mel normalization offset (applied after scaling)
pub const MEL_OFFSET: f32 = 2.0;

/// Score used when a classifier output is unusable
pub const NEUTRAL_SCORE: f32 = 0.0;

/// Running totals for one pipeline instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Chunks processed
    pub chunks: u64,
    /// Mel frames produced by Stage A
    pub mel_frames: u64,
    /// Embeddings produced by Stage B
    pub embeddings: u64,
    /// Scores produced by all Stage C instances
    pub scores: u64,
}

/// Mel → embedding → classifier cascade over a chunked audio stream
pub struct StreamingPipeline {
    features: FeatureStage,
    embeddings: EmbeddingStage,
    classifiers: Vec<ClassifierStage>,
    stats: PipelineStats,
}

impl StreamingPipeline {
    /// Assemble a pipeline from its stages
    #[must_use]
    pub fn new(
        features: FeatureStage,
        embeddings: EmbeddingStage,
        classifiers: Vec<ClassifierStage>,
    ) -> Self {
        Self {
            features,
            embeddings,
            classifiers,
            stats: PipelineStats::default(),
        }
    }

    /// Assemble a pipeline with the standard window geometry
    #[must_use]
    pub fn from_engines(
        mel: Box<dyn MelEngine>,
        embedding: Box<dyn EmbeddingEngine>,
        classifiers: Vec<(String, Box<dyn ClassifierEngine>)>,
    ) -> Self {
        Self::new(
            FeatureStage::new(mel),
            EmbeddingStage::new(embedding),
            classifiers
                .into_iter()
                .map(|(label, engine)| ClassifierStage::new(label, engine))
                .collect(),
        )
    }

    /// Run one audio chunk through all three stages
    ///
    /// Returns every score produced, in stream order per classifier.
    /// Never fails: malformed engine output degrades to neutral values.
    pub fn process_chunk(&mut self, chunk: &[i16]) -> Vec<DetectionScore> {
        let mel = self.features.process(chunk);
        let mel_count = mel.len() as u64;

        let embeddings = self.embeddings.push(mel);

        let mut scores = Vec::new();
        if !embeddings.is_empty() {
            for classifier in &mut self.classifiers {
                scores.extend(classifier.push(&embeddings));
            }
        }

        self.stats.chunks += 1;
        self.stats.mel_frames += mel_count;
        self.stats.embeddings += embeddings.len() as u64;
        self.stats.scores += scores.len() as u64;

        tracing::trace!(
            mel = mel_count,
            embeddings = embeddings.len(),
            scores = scores.len(),
            pending_mel = self.embeddings.pending(),
            "pipeline chunk processed"
        );

        scores
    }

    /// Clear all stage buffers and counters
    pub fn reset(&mut self) {
        self.embeddings.reset();
        for classifier in &mut self.classifiers {
            classifier.reset();
        }
        self.stats = PipelineStats::default();
    }

    /// Running totals
    #[must_use]
    pub const fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Mel frames buffered in Stage B
    #[must_use]
    pub fn pending_mel(&self) -> usize {
        self.embeddings.pending()
    }

    /// Embeddings buffered in each Stage C, by label
    #[must_use]
    pub fn pending_embeddings(&self) -> Vec<(&str, usize)> {
        self.classifiers
            .iter()
            .map(|c| (c.label(), c.pending()))
            .collect()
    }

    /// Labels of the attached classifiers
    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        self.classifiers.iter().map(ClassifierStage::label).collect()
    }
}

/// Embeddings expected after `mel_frames` mel frames with the standard geometry
#[must_use]
pub const fn expected_embeddings(mel_frames: usize) -> usize {
    if mel_frames < WINDOW_MEL {
        0
    } else {
        (mel_frames - WINDOW_MEL) / STRIDE_MEL + 1
    }
}
