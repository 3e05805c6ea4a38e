//! Voice activity gating
//!
//! A per-frame speech probability feeds a hysteresis gate that decides
//! when a captured utterance is complete. Time is the frame clock
//! ([`Frame::timestamp`]) rather than wall time, so the gate behaves the
//! same whether frames arrive live or from a recording.

use std::time::Duration;

use voice_activity_detector::VoiceActivityDetector;

use super::frame::Frame;
use crate::{Error, Result};

/// Silero VAD window at 16kHz (32ms)
const SILERO_CHUNK_16KHZ: usize = 512;

/// Silero VAD window at 8kHz (32ms)
const SILERO_CHUNK_8KHZ: usize = 256;

/// RMS level mapped to probability 1.0 by the energy estimator
const ENERGY_REFERENCE_RMS: f32 = 0.06;

/// Thresholds and durations for the hysteresis gate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateConfig {
    /// Probability at or above which audio counts as voice
    pub voice_threshold: f32,
    /// Probability below which audio counts as silence while speaking
    pub silence_threshold: f32,
    /// Minimum time since speech start before finalizing
    pub min_speech: Duration,
    /// Trailing silence required to finalize
    pub silence: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            voice_threshold: 0.5,
            silence_threshold: 0.35,
            min_speech: Duration::from_millis(300),
            silence: Duration::from_millis(800),
        }
    }
}

/// Hysteresis classifier that decides when an utterance has ended
#[derive(Debug, Clone)]
pub struct VoiceActivityGate {
    config: GateConfig,
    speaking: bool,
    speech_start: Option<Duration>,
    silence_start: Option<Duration>,
    finalized: bool,
}

impl VoiceActivityGate {
    /// Create a gate in the not-speaking state
    #[must_use]
    pub const fn new(config: GateConfig) -> Self {
        Self {
            config,
            speaking: false,
            speech_start: None,
            silence_start: None,
            finalized: false,
        }
    }

    /// Feed one voice probability sample taken at stream time `now`
    ///
    /// Returns true when the utterance should be finalized. Fires at most
    /// once between calls to [`VoiceActivityGate::reset`].
    pub fn update(&mut self, probability: f32, now: Duration) -> bool {
        if self.speaking {
            if probability >= self.config.voice_threshold {
                self.silence_start = None;
            } else if probability < self.config.silence_threshold && self.silence_start.is_none() {
                self.silence_start = Some(now);
            }
        } else if probability >= self.config.voice_threshold {
            self.speaking = true;
            self.speech_start = Some(now);
            self.silence_start = None;
            tracing::trace!(?now, probability, "speech started");
        }

        if self.finalized || !self.should_finalize(now) {
            return false;
        }

        self.finalized = true;
        tracing::debug!(?now, "utterance finalized");
        true
    }

    fn should_finalize(&self, now: Duration) -> bool {
        let (Some(speech_start), Some(silence_start)) = (self.speech_start, self.silence_start)
        else {
            return false;
        };

        self.speaking
            && now.saturating_sub(speech_start) >= self.config.min_speech
            && now.saturating_sub(silence_start) >= self.config.silence
    }

    /// Clear speaking flag and both timers
    pub fn reset(&mut self) {
        self.speaking = false;
        self.speech_start = None;
        self.silence_start = None;
        self.finalized = false;
    }

    /// Whether speech has started since the last reset
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Stream time at which speech started
    #[must_use]
    pub const fn speech_start(&self) -> Option<Duration> {
        self.speech_start
    }

    /// Stream time at which the current silence run started
    #[must_use]
    pub const fn silence_start(&self) -> Option<Duration> {
        self.silence_start
    }

    /// Gate configuration
    #[must_use]
    pub const fn config(&self) -> &GateConfig {
        &self.config
    }
}

/// Per-frame speech probability engine
pub trait VoiceProbability {
    /// Probability in [0, 1] that `frame` contains speech
    ///
    /// # Errors
    ///
    /// Returns error if the underlying engine fails
    fn probability(&mut self, frame: &Frame) -> Result<f32>;

    /// Drop any internal state carried between frames
    fn reset(&mut self) {}
}

/// Energy-based speech probability (no model required)
#[derive(Debug, Clone, Default)]
pub struct EnergyProbability;

impl VoiceProbability for EnergyProbability {
    fn probability(&mut self, frame: &Frame) -> Result<f32> {
        let energy = calculate_energy(&frame.to_f32());
        Ok((energy / ENERGY_REFERENCE_RMS).clamp(0.0, 1.0))
    }
}

/// Silero VAD speech probability
pub struct SileroProbability {
    vad: VoiceActivityDetector,
    sample_rate: u32,
    chunk_size: usize,
    remainder: Vec<i16>,
    last: f32,
}

impl SileroProbability {
    /// Load the Silero model for `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the sample rate is not 8000 or 16000 Hz or the
    /// model fails to initialize
    pub fn new(sample_rate: u32) -> Result<Self> {
        let chunk_size = silero_chunk_size(sample_rate)?;
        let vad = build_silero(sample_rate, chunk_size)?;

        tracing::debug!(sample_rate, chunk_size, "silero vad initialized");

        Ok(Self {
            vad,
            sample_rate,
            chunk_size,
            remainder: Vec::with_capacity(chunk_size),
            last: 0.0,
        })
    }
}

impl VoiceProbability for SileroProbability {
    fn probability(&mut self, frame: &Frame) -> Result<f32> {
        if frame.sample_rate != self.sample_rate {
            return Err(Error::Vad(format!(
                "frame sample rate {} does not match VAD rate {}",
                frame.sample_rate, self.sample_rate
            )));
        }

        self.remainder.extend_from_slice(&frame.samples);

        let mut peak: Option<f32> = None;
        while self.remainder.len() >= self.chunk_size {
            let chunk: Vec<i16> = self.remainder.drain(..self.chunk_size).collect();
            let p = self.vad.predict(chunk);
            peak = Some(peak.map_or(p, |prev| prev.max(p)));
        }

        if let Some(p) = peak {
            self.last = p;
        }
        Ok(self.last)
    }

    fn reset(&mut self) {
        self.remainder.clear();
        self.last = 0.0;
        match build_silero(self.sample_rate, self.chunk_size) {
            Ok(vad) => self.vad = vad,
            Err(e) => tracing::warn!(error = %e, "failed to reinitialize silero vad"),
        }
    }
}

fn silero_chunk_size(sample_rate: u32) -> Result<usize> {
    match sample_rate {
        16000 => Ok(SILERO_CHUNK_16KHZ),
        8000 => Ok(SILERO_CHUNK_8KHZ),
        other => Err(Error::Config(format!(
            "unsupported VAD sample rate: {other} Hz (must be 8000 or 16000 Hz)"
        ))),
    }
}

#[allow(clippy::cast_possible_wrap)]
fn build_silero(sample_rate: u32, chunk_size: usize) -> Result<VoiceActivityDetector> {
    VoiceActivityDetector::builder()
        .sample_rate(sample_rate as i32)
        .chunk_size(chunk_size)
        .build()
        .map_err(|e| Error::Vad(e.to_string()))
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(80);

    fn at(frame: u32) -> Duration {
        FRAME * frame
    }

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(calculate_energy(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(calculate_energy(&loud) > 0.4);
    }

    #[test]
    fn test_energy_probability_bounds() {
        let mut engine = EnergyProbability;
        let quiet = Frame::new(vec![0; 1280], 16000, 0);
        let loud = Frame::new(vec![i16::MAX; 1280], 16000, 1);

        assert!(engine.probability(&quiet).unwrap() < 0.01);
        assert!((engine.probability(&loud).unwrap() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_silence_before_speech_never_finalizes() {
        let mut gate = VoiceActivityGate::new(GateConfig::default());
        for i in 0..100 {
            assert!(!gate.update(0.0, at(i)));
        }
        assert!(!gate.is_speaking());
    }

    #[test]
    fn test_finalize_after_speech_and_silence() {
        let mut gate = VoiceActivityGate::new(GateConfig::default());

        // 400ms of speech
        for i in 1..=5 {
            assert!(!gate.update(0.9, at(i)));
        }
        assert!(gate.is_speaking());

        // silence starts at frame 6, needs 800ms = 10 frames
        let mut fired_at = None;
        for i in 6..=20 {
            if gate.update(0.1, at(i)) {
                fired_at = Some(i);
                break;
            }
        }
        assert_eq!(fired_at, Some(16));
    }

    #[test]
    fn test_rebound_cancels_silence_timer() {
        let mut gate = VoiceActivityGate::new(GateConfig::default());
        gate.update(0.9, at(1));
        gate.update(0.1, at(2));
        assert_eq!(gate.silence_start(), Some(at(2)));

        gate.update(0.8, at(3));
        assert_eq!(gate.silence_start(), None);
    }

    #[test]
    fn test_between_thresholds_keeps_timer_state() {
        let mut gate = VoiceActivityGate::new(GateConfig::default());
        gate.update(0.9, at(1));
        gate.update(0.1, at(2));

        // 0.4 is neither voice nor silence
        gate.update(0.4, at(3));
        assert_eq!(gate.silence_start(), Some(at(2)));
    }

    #[test]
    fn test_min_speech_duration_required() {
        let config = GateConfig {
            min_speech: Duration::from_secs(2),
            silence: Duration::from_millis(160),
            ..GateConfig::default()
        };
        let mut gate = VoiceActivityGate::new(config);

        gate.update(0.9, at(1));
        assert!(!gate.update(0.0, at(2)));
        assert!(!gate.update(0.0, at(5)));
        // 2s after speech start at 80ms
        assert!(gate.update(0.0, at(26)));
    }

    #[test]
    fn test_fires_once_until_reset() {
        let config = GateConfig {
            min_speech: Duration::ZERO,
            silence: Duration::ZERO,
            ..GateConfig::default()
        };
        let mut gate = VoiceActivityGate::new(config);

        gate.update(0.9, at(1));
        assert!(gate.update(0.0, at(2)));
        assert!(!gate.update(0.0, at(3)));
        assert!(!gate.update(0.0, at(4)));

        gate.reset();
        assert!(!gate.is_speaking());
        assert_eq!(gate.speech_start(), None);
        gate.update(0.9, at(5));
        assert!(gate.update(0.0, at(6)));
    }

    #[test]
    fn test_silero_rejects_unsupported_rate() {
        let err = silero_chunk_size(44100).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("8000") && msg.contains("16000"));
    }
}
