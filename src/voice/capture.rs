//! Audio capture from microphone
//!
//! Slices the input stream into fixed-length [`Frame`]s and pushes them
//! into a bounded channel. There is no backpressure: when the consumer
//! falls behind, frames are dropped at the source.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::frame::{Frame, f32_to_i16};
use crate::{Error, Result};

/// Captures audio from the default input device
pub struct AudioCapture {
    config: StreamConfig,
    frame_length: usize,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new(sample_rate: u32, frame_length: usize) -> Result<Self> {
        if frame_length == 0 {
            return Err(Error::Config("frame length must be non-zero".to_string()));
        }

        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            frame_length,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            frame_length,
            stream: None,
        })
    }

    /// Start capturing, delivering frames to `frames`
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub fn start(&mut self, frames: mpsc::Sender<Frame>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device".to_string()))?;

        let mut framer = Framer::new(self.frame_length, self.config.sample_rate.0);

        let stream = device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for frame in framer.push(data) {
                        if frames.try_send(frame).is_err() {
                            tracing::trace!("frame channel full, dropping frame");
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

/// Accumulates callback-sized sample runs into fixed-length frames
#[derive(Debug)]
pub struct Framer {
    frame_length: usize,
    sample_rate: u32,
    pending: Vec<i16>,
    next_sequence: u64,
}

impl Framer {
    /// Create a framer producing frames of `frame_length` samples
    #[must_use]
    pub fn new(frame_length: usize, sample_rate: u32) -> Self {
        Self {
            frame_length,
            sample_rate,
            pending: Vec::with_capacity(frame_length),
            next_sequence: 0,
        }
    }

    /// Append samples and return every frame that became complete
    pub fn push(&mut self, data: &[f32]) -> Vec<Frame> {
        self.pending.extend(data.iter().map(|&s| f32_to_i16(s)));

        let mut complete = Vec::new();
        while self.pending.len() >= self.frame_length {
            let samples: Vec<i16> = self.pending.drain(..self.frame_length).collect();
            complete.push(Frame::new(samples, self.sample_rate, self.next_sequence));
            self.next_sequence += 1;
        }
        complete
    }
}

/// Convert i16 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framer_emits_fixed_frames_in_order() {
        let mut framer = Framer::new(4, 16000);

        assert!(framer.push(&[0.1, 0.2, 0.3]).is_empty());

        let frames = framer.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].sequence, 0);
        assert_eq!(frames[1].sequence, 1);
        assert!(frames.iter().all(|f| f.samples.len() == 4));

        // one sample left over
        let frames = framer.push(&[0.0, 0.0, 0.0]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence, 2);
    }

    #[test]
    fn test_samples_to_wav_header() {
        let wav = samples_to_wav(&[0, 1000, -1000, 0], 16000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 8);
    }
}
