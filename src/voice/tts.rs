//! Text-to-speech (TTS) processing

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};

use super::frame::AudioBuffer;
use super::playback::PLAYBACK_SAMPLE_RATE;
use super::stt::{DEFAULT_API_BASE, HTTP_TIMEOUT};
use crate::{Error, Result};

/// Speech synthesizer
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize a complete text
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str) -> Result<AudioBuffer>;

    /// Synthesize text arriving as increments
    ///
    /// The default groups increments into sentences and synthesizes each
    /// as soon as it is complete. An error in the input ends the output
    /// with that error.
    fn synthesize_stream<'a>(
        &'a self,
        increments: BoxStream<'a, Result<String>>,
    ) -> BoxStream<'a, Result<AudioBuffer>> {
        sentences(increments)
            .then(move |sentence| async move {
                match sentence {
                    Ok(text) => self.synthesize(&text).await,
                    Err(e) => Err(e),
                }
            })
            .boxed()
    }
}

/// Splits streamed text into sentences
///
/// `.`, `!` and `?` end a sentence only when whitespace follows, so "3.5"
/// stays whole; a terminator at the end of the buffer waits for the next
/// increment or [`SentenceSplitter::finish`]. A newline always ends one.
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    buffer: String,
}

impl SentenceSplitter {
    /// Append text and return every sentence it completed
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);

        let mut sentences = Vec::new();
        let mut start = 0;
        let mut chars = self.buffer.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            let boundary = match c {
                '\n' => true,
                '.' | '!' | '?' => chars.peek().is_some_and(|&(_, next)| next.is_whitespace()),
                _ => false,
            };
            if boundary {
                let end = i + c.len_utf8();
                let sentence = self.buffer[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                start = end;
            }
        }
        self.buffer.drain(..start);
        sentences
    }

    /// Return the unterminated remainder, if any
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

/// Regroup a stream of text increments into sentences
pub fn sentences<'a>(
    increments: BoxStream<'a, Result<String>>,
) -> BoxStream<'a, Result<String>> {
    struct State<'a> {
        increments: BoxStream<'a, Result<String>>,
        splitter: SentenceSplitter,
        ready: VecDeque<String>,
        done: bool,
    }

    let state = State {
        increments,
        splitter: SentenceSplitter::default(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(sentence) = state.ready.pop_front() {
                return Some((Ok(sentence), state));
            }
            if state.done {
                return None;
            }
            match state.increments.next().await {
                Some(Ok(text)) => state.ready.extend(state.splitter.push(&text)),
                Some(Err(e)) => {
                    state.done = true;
                    state.ready.clear();
                    return Some((Err(e), state));
                }
                None => {
                    state.done = true;
                    state.ready.extend(state.splitter.finish());
                }
            }
        }
    })
    .boxed()
}

/// Synthesizer over an OpenAI-compatible speech endpoint
pub struct HttpSynthesizer {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    voice: String,
    speed: f32,
    model: String,
}

impl HttpSynthesizer {
    /// Create a new synthesizer
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the HTTP client cannot be built
    pub fn new(api_key: String, model: String, voice: String, speed: f32) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key,
            voice,
            speed,
            model,
        })
    }

    /// Use a different API base (e.g. a local server)
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioBuffer> {
        #[derive(serde::Serialize)]
        struct SpeechRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "pcm",
        };

        tracing::debug!(chars = text.len(), voice = %self.voice, "synthesizing speech");

        let response = self
            .client
            .post(format!("{}/audio/speech", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(AudioBuffer::from_le_bytes(&audio, PLAYBACK_SAMPLE_RATE))
    }
}
