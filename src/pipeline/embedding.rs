//! Stage B: embedding over a sliding window of mel frames

use std::collections::VecDeque;

use super::features::MelFrame;
use super::{EMBEDDING_DIM, STRIDE_MEL, WINDOW_MEL};
use crate::Result;

/// Fixed-size summary of one window of mel frames
pub type EmbeddingVector = [f32; EMBEDDING_DIM];

/// An embedding tagged with the index of the last mel frame it covers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Embedding {
    /// Embedding values
    pub vector: EmbeddingVector,
    /// Stream index of the newest mel frame in the window
    pub end_frame: u64,
}

/// Computes an embedding from exactly one window of mel frames
pub trait EmbeddingEngine {
    /// Embed `window` (always `window` frames long)
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails to run
    fn embed(&mut self, window: &[MelFrame]) -> Result<Vec<f32>>;
}

/// Embedding stage with an overlapping mel window
pub struct EmbeddingStage {
    engine: Box<dyn EmbeddingEngine>,
    window: usize,
    stride: usize,
    buffer: VecDeque<MelFrame>,
    /// Stream index of `buffer[0]`
    front_index: u64,
    emitted: u64,
}

impl EmbeddingStage {
    /// Stage with the standard `WINDOW_MEL`/`STRIDE_MEL` geometry
    #[must_use]
    pub fn new(engine: Box<dyn EmbeddingEngine>) -> Self {
        Self::with_geometry(engine, WINDOW_MEL, STRIDE_MEL)
    }

    /// Stage with a custom window and stride
    ///
    /// # Panics
    ///
    /// Panics if `stride` is zero or larger than `window`
    #[must_use]
    pub fn with_geometry(engine: Box<dyn EmbeddingEngine>, window: usize, stride: usize) -> Self {
        assert!(stride > 0 && stride <= window, "stride must be in 1..=window");
        Self {
            engine,
            window,
            stride,
            buffer: VecDeque::with_capacity(window + stride),
            front_index: 0,
            emitted: 0,
        }
    }

    /// Append mel frames and emit every embedding that became computable
    ///
    /// Consumes the oldest window, then slides forward by `stride` frames,
    /// until fewer than `window` frames remain.
    pub fn push(&mut self, frames: Vec<MelFrame>) -> Vec<Embedding> {
        self.buffer.extend(frames);

        let mut out = Vec::new();
        while self.buffer.len() >= self.window {
            let window = &self.buffer.make_contiguous()[..self.window];
            let vector = match self.engine.embed(window) {
                Ok(raw) => EmbeddingVector::try_from(raw.as_slice()).unwrap_or_else(|_| {
                    tracing::warn!(len = raw.len(), expected = EMBEDDING_DIM, "embedding shape mismatch, zero-filling");
                    [0.0; EMBEDDING_DIM]
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "embedding failed, zero-filling");
                    [0.0; EMBEDDING_DIM]
                }
            };

            out.push(Embedding {
                vector,
                end_frame: self.front_index + self.window as u64 - 1,
            });

            self.buffer.drain(..self.stride);
            self.front_index += self.stride as u64;
        }

        self.emitted += out.len() as u64;
        out
    }

    /// Mel frames waiting for the next window
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Total embeddings emitted since creation or reset
    #[must_use]
    pub const fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Drop buffered frames and counters
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.front_index = 0;
        self.emitted = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::MEL_BINS;

    struct Mean;

    impl EmbeddingEngine for Mean {
        fn embed(&mut self, window: &[MelFrame]) -> Result<Vec<f32>> {
            #[allow(clippy::cast_precision_loss)]
            let mean = window.iter().map(|f| f[0]).sum::<f32>() / window.len() as f32;
            Ok(vec![mean; EMBEDDING_DIM])
        }
    }

    struct Short;

    impl EmbeddingEngine for Short {
        fn embed(&mut self, _window: &[MelFrame]) -> Result<Vec<f32>> {
            Ok(vec![1.0; 3])
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn frames(range: std::ops::Range<usize>) -> Vec<MelFrame> {
        range.map(|i| [i as f32; MEL_BINS]).collect()
    }

    #[test]
    fn test_window_overlaps_by_stride() {
        let mut stage = EmbeddingStage::new(Box::new(Mean));

        assert!(stage.push(frames(0..WINDOW_MEL - 1)).is_empty());
        assert_eq!(stage.pending(), WINDOW_MEL - 1);

        let out = stage.push(frames(WINDOW_MEL - 1..WINDOW_MEL));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].end_frame, WINDOW_MEL as u64 - 1);
        // only the stride is discarded
        assert_eq!(stage.pending(), WINDOW_MEL - STRIDE_MEL);

        let out = stage.push(frames(WINDOW_MEL..WINDOW_MEL + STRIDE_MEL));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].end_frame, (WINDOW_MEL + STRIDE_MEL) as u64 - 1);
        // mean of frames 8..84
        assert!((out[0].vector[0] - 45.5).abs() < 1e-4);
    }

    #[test]
    fn test_full_drain_per_call() {
        let mut stage = EmbeddingStage::new(Box::new(Mean));
        let out = stage.push(frames(0..200));

        // floor((200 - 76) / 8) + 1
        assert_eq!(out.len(), 16);
        assert!(stage.pending() < WINDOW_MEL);
        assert_eq!(stage.emitted(), 16);
    }

    #[test]
    fn test_wrong_shape_zero_fills() {
        let mut stage = EmbeddingStage::new(Box::new(Short));
        let out = stage.push(frames(0..WINDOW_MEL));
        assert_eq!(out.len(), 1);
        assert!(out[0].vector.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_reset_clears_buffer() {
        let mut stage = EmbeddingStage::new(Box::new(Mean));
        stage.push(frames(0..100));
        stage.reset();
        assert_eq!(stage.pending(), 0);
        assert_eq!(stage.emitted(), 0);
    }
}
