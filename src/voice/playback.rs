//! Audio playback to speakers

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::frame::AudioBuffer;
use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Destination for synthesized speech
#[async_trait]
pub trait AudioSink: Send {
    /// Play a complete buffer, returning once it has been heard
    async fn play(&mut self, audio: AudioBuffer) -> Result<()>;

    /// Queue a chunk of streamed audio
    async fn write(&mut self, audio: AudioBuffer) -> Result<()>;

    /// Play everything queued by [`AudioSink::write`] to completion
    async fn flush(&mut self) -> Result<()>;
}

/// Plays audio to the default output device
pub struct AudioPlayback {
    config: StreamConfig,
    pending: Vec<i16>,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            config,
            pending: Vec::new(),
        })
    }

    async fn play_samples(&self, audio: AudioBuffer) -> Result<()> {
        if audio.is_empty() {
            return Ok(());
        }

        if audio.sample_rate != self.config.sample_rate.0 {
            tracing::warn!(
                expected = self.config.sample_rate.0,
                actual = audio.sample_rate,
                "playback sample rate mismatch"
            );
        }

        let config = self.config.clone();
        tokio::task::spawn_blocking(move || play_samples_blocking(&config, &audio.samples))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}

#[async_trait]
impl AudioSink for AudioPlayback {
    async fn play(&mut self, audio: AudioBuffer) -> Result<()> {
        self.play_samples(audio).await
    }

    async fn write(&mut self, audio: AudioBuffer) -> Result<()> {
        self.pending.extend_from_slice(&audio.samples);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let samples = std::mem::take(&mut self.pending);
        let sample_rate = self.config.sample_rate.0;
        self.play_samples(AudioBuffer::new(samples, sample_rate)).await
    }
}

/// Play samples on a fresh output stream, blocking until done
fn play_samples_blocking(config: &StreamConfig, samples: &[i16]) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let channels = config.channels as usize;
    let sample_count = samples.len();

    let samples: Arc<Vec<f32>> = Arc::new(samples.iter().map(|&s| f32::from(s) / 32768.0).collect());
    let position = Arc::new(Mutex::new(0usize));
    let finished = Arc::new(Mutex::new(false));

    let samples_clone = Arc::clone(&samples);
    let position_clone = Arc::clone(&position);
    let finished_clone = Arc::clone(&finished);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut pos) = position_clone.lock() else {
                    return;
                };

                for frame in data.chunks_mut(channels) {
                    let sample = if *pos < samples_clone.len() {
                        samples_clone[*pos]
                    } else {
                        if let Ok(mut done) = finished_clone.lock() {
                            *done = true;
                        }
                        0.0
                    };

                    for out in frame.iter_mut() {
                        *out = sample;
                    }

                    if *pos < samples_clone.len() {
                        *pos += 1;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    // Wait for playback to finish
    let duration_ms = (sample_count as u64 * 1000) / u64::from(config.sample_rate.0.max(1));

    // Poll for completion with timeout
    let start = Instant::now();
    let timeout = Duration::from_millis(duration_ms + 500);

    while !finished.lock().map(|done| *done).unwrap_or(true) {
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    // Small delay to ensure audio finishes
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");

    Ok(())
}
