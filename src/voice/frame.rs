//! PCM frames and audio buffers

use std::time::Duration;

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Default frame length (80ms at 16kHz)
pub const FRAME_LENGTH: usize = 1280;

/// A fixed-length slice of microphone audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Signed 16-bit mono samples
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Strictly increasing index assigned by the frame source
    pub sequence: u64,
}

impl Frame {
    /// Create a frame
    #[must_use]
    pub const fn new(samples: Vec<i16>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples,
            sample_rate,
            sequence,
        }
    }

    /// Playback duration of this frame
    #[must_use]
    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len(), self.sample_rate)
    }

    /// Stream time at the end of this frame
    ///
    /// Frames are fixed-length, so `(sequence + 1) * duration` is a
    /// deterministic clock that does not depend on wall time.
    #[must_use]
    pub fn timestamp(&self) -> Duration {
        self.duration()
            .saturating_mul(u32::try_from(self.sequence + 1).unwrap_or(u32::MAX))
    }

    /// Samples scaled to [-1.0, 1.0]
    #[must_use]
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
    }
}

/// Synthesized or decoded audio ready for playback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioBuffer {
    /// Signed 16-bit mono samples
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create an audio buffer
    #[must_use]
    pub const fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decode little-endian 16-bit PCM bytes
    #[must_use]
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(samples, sample_rate)
    }

    /// Whether there is nothing to play
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration
    #[must_use]
    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len(), self.sample_rate)
    }
}

fn samples_duration(len: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let micros = (len as u64).saturating_mul(1_000_000) / u64::from(sample_rate);
    Duration::from_micros(micros)
}

/// Convert an f32 sample in [-1.0, 1.0] to i16
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration_and_timestamp() {
        let frame = Frame::new(vec![0; FRAME_LENGTH], SAMPLE_RATE, 0);
        assert_eq!(frame.duration(), Duration::from_millis(80));
        assert_eq!(frame.timestamp(), Duration::from_millis(80));

        let later = Frame::new(vec![0; FRAME_LENGTH], SAMPLE_RATE, 9);
        assert_eq!(later.timestamp(), Duration::from_millis(800));
    }

    #[test]
    fn test_pcm_bytes_decode() {
        let bytes = [0x01, 0x00, 0xff, 0xff, 0x00];
        let audio = AudioBuffer::from_le_bytes(&bytes, 24000);
        assert_eq!(audio.samples, vec![1, -1]);
    }

    #[test]
    fn test_f32_conversion_clamps() {
        assert_eq!(f32_to_i16(2.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32768);
        assert_eq!(f32_to_i16(0.0), 0);
    }
}
