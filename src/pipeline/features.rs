//! Stage A: short-time feature extraction
//!
//! Turns one audio chunk into a short burst of mel frames and applies the
//! fixed affine normalization the embedding model was trained with.

use super::{MEL_BINS, MEL_OFFSET, MEL_SCALE};
use crate::{Error, Result};

/// One short-time feature frame
pub type MelFrame = [f32; MEL_BINS];

/// Burst size assumed before the engine has produced a well-formed chunk
pub const DEFAULT_FRAMES_PER_CHUNK: usize = 5;

/// Computes raw mel coefficients for a chunk of audio
pub trait MelEngine {
    /// Row-major `frames x MEL_BINS` coefficients for `chunk`
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails to run
    fn compute(&mut self, chunk: &[i16]) -> Result<Vec<f32>>;
}

/// Feature extraction stage
pub struct FeatureStage {
    engine: Box<dyn MelEngine>,
    frames_per_chunk: usize,
}

impl FeatureStage {
    /// Wrap a mel engine
    #[must_use]
    pub fn new(engine: Box<dyn MelEngine>) -> Self {
        Self {
            engine,
            frames_per_chunk: DEFAULT_FRAMES_PER_CHUNK,
        }
    }

    /// Extract normalized mel frames from one chunk
    ///
    /// A failing engine or a malformed output yields a zero-filled burst of
    /// the last known size instead of an error.
    pub fn process(&mut self, chunk: &[i16]) -> Vec<MelFrame> {
        let frames = self
            .engine
            .compute(chunk)
            .and_then(|raw| split_frames(&raw));

        match frames {
            Ok(frames) => {
                if !frames.is_empty() {
                    self.frames_per_chunk = frames.len();
                }
                frames.into_iter().map(normalize).collect()
            }
            Err(e) => {
                tracing::warn!(error = %e, frames = self.frames_per_chunk, "mel extraction failed, zero-filling");
                vec![[0.0; MEL_BINS]; self.frames_per_chunk]
            }
        }
    }

    /// Burst size currently used for zero-filling
    #[must_use]
    pub const fn frames_per_chunk(&self) -> usize {
        self.frames_per_chunk
    }
}

/// Split flat engine output into mel frames
///
/// # Errors
///
/// Returns `Error::Pipeline` if the length is not a multiple of `MEL_BINS`
pub fn split_frames(raw: &[f32]) -> Result<Vec<MelFrame>> {
    if raw.len() % MEL_BINS != 0 {
        return Err(Error::Pipeline(format!(
            "mel output of {} values is not a multiple of {MEL_BINS} bins",
            raw.len()
        )));
    }

    raw.chunks_exact(MEL_BINS)
        .map(|row| {
            MelFrame::try_from(row).map_err(|_| Error::Pipeline("mel row size".to_string()))
        })
        .collect()
}

/// Scale then offset each coefficient
fn normalize(mut frame: MelFrame) -> MelFrame {
    for value in &mut frame {
        *value = *value * MEL_SCALE + MEL_OFFSET;
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<Vec<f32>>);

    impl MelEngine for Fixed {
        fn compute(&mut self, _chunk: &[i16]) -> Result<Vec<f32>> {
            match &self.0 {
                Ok(v) => Ok(v.clone()),
                Err(e) => Err(Error::Pipeline(e.to_string())),
            }
        }
    }

    #[test]
    fn test_normalization_is_scale_then_offset() {
        let mut stage = FeatureStage::new(Box::new(Fixed(Ok(vec![10.0; MEL_BINS * 2]))));
        let frames = stage.process(&[0; 1280]);

        assert_eq!(frames.len(), 2);
        // 10 * 0.1 + 2.0
        assert!(frames.iter().flatten().all(|&v| (v - 3.0).abs() < 1e-6));
        assert_eq!(stage.frames_per_chunk(), 2);
    }

    #[test]
    fn test_malformed_output_zero_fills() {
        let mut stage = FeatureStage::new(Box::new(Fixed(Ok(vec![1.0; MEL_BINS + 3]))));
        let frames = stage.process(&[0; 1280]);

        assert_eq!(frames.len(), DEFAULT_FRAMES_PER_CHUNK);
        assert!(frames.iter().flatten().all(|&v| v == 0.0));
    }

    #[test]
    fn test_engine_error_zero_fills() {
        let mut stage = FeatureStage::new(Box::new(Fixed(Err(Error::Pipeline(
            "boom".to_string(),
        )))));
        assert_eq!(stage.process(&[0; 1280]).len(), DEFAULT_FRAMES_PER_CHUNK);
    }
}
