//! Speech-to-text (STT) processing

use std::time::Duration;

use async_trait::async_trait;

use super::capture::samples_to_wav;
use super::frame::Frame;
use crate::{Error, Result};

/// Default OpenAI-compatible API base
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Upper bound on a single STT or TTS request
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of feeding one frame to a recognizer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecognizerUpdate {
    /// Current uncommitted hypothesis, if the engine produced one
    pub partial: Option<String>,
    /// The engine detected the end of the utterance itself
    pub endpoint: bool,
}

/// Incremental speech recognizer
#[async_trait]
pub trait Recognizer: Send {
    /// Feed one frame of the current utterance
    ///
    /// # Errors
    ///
    /// Returns error if the engine rejects the audio
    async fn process(&mut self, frame: &Frame) -> Result<RecognizerUpdate>;

    /// Finish the utterance and return the remaining committed text
    ///
    /// Resets engine state so the next utterance starts clean.
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    async fn flush(&mut self) -> Result<String>;

    /// Drop any buffered audio without transcribing it
    fn reset(&mut self);
}

/// Response from the transcription API
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Batch recognizer over an OpenAI-compatible transcription endpoint
///
/// Buffers the utterance and transcribes it on [`Recognizer::flush`].
/// Never reports partials or endpoints.
pub struct HttpRecognizer {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    language: Option<String>,
    buffer: Vec<i16>,
    sample_rate: u32,
}

impl HttpRecognizer {
    /// Create a new recognizer
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the HTTP client cannot be built
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for transcription".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key,
            model,
            language: None,
            buffer: Vec::new(),
            sample_rate: super::frame::SAMPLE_RATE,
        })
    }

    /// Use a different API base (e.g. a local server)
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Hint the spoken language (ISO-639-1)
    #[must_use]
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Samples buffered for the current utterance
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Transcribe WAV audio
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the API reports an error
    pub async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Stt(format!("transcription API error {status}: {body}")));
        }

        let result: TranscriptionResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        let text = result.text.trim().to_string();
        tracing::info!(transcript = %text, "transcription complete");
        Ok(text)
    }
}

#[async_trait]
impl Recognizer for HttpRecognizer {
    async fn process(&mut self, frame: &Frame) -> Result<RecognizerUpdate> {
        self.sample_rate = frame.sample_rate;
        self.buffer.extend_from_slice(&frame.samples);
        Ok(RecognizerUpdate::default())
    }

    async fn flush(&mut self) -> Result<String> {
        let samples = std::mem::take(&mut self.buffer);
        if samples.is_empty() {
            return Ok(String::new());
        }

        let wav = samples_to_wav(&samples, self.sample_rate)?;
        self.transcribe(&wav).await
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        assert!(HttpRecognizer::new(String::new(), "whisper-1".to_string()).is_err());
    }

    #[tokio::test]
    async fn test_buffers_until_flush() {
        let mut recognizer = HttpRecognizer::new("sk-test".to_string(), "whisper-1".to_string())
            .unwrap()
            .with_api_base("http://localhost:8000/v1/");

        let frame = Frame::new(vec![0; 1280], 16000, 0);
        let update = recognizer.process(&frame).await.unwrap();
        assert_eq!(update, RecognizerUpdate::default());
        assert_eq!(recognizer.buffered(), 1280);
        assert_eq!(recognizer.api_base, "http://localhost:8000/v1");

        recognizer.reset();
        assert_eq!(recognizer.buffered(), 0);

        // nothing buffered, no request made
        assert_eq!(recognizer.flush().await.unwrap(), "");
    }
}
