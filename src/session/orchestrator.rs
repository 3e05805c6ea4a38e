//! Session orchestrator
//!
//! Owns the frame stream and every collaborator. Frames are handled one at
//! a time. While a turn is in flight incoming frames are dropped, never
//! queued. Every frame still reaches the wake spotter so its windows track
//! live audio; detections outside `IdleListening` are ignored.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};

use super::{FrameOutcome, Session, SessionConfig, SessionState, TurnOutcome, TurnStats};
use crate::db::{FactStore, LAST_PERSONA_KEY};
use crate::dialogue::DialogueClient;
use crate::voice::{
    AudioSink, Frame, Recognizer, Synthesizer, VoiceActivityGate, VoiceProbability,
    WakeDetection, WakeSpotter,
};
use crate::{Error, Result};

/// Collaborators the orchestrator drives
pub struct Components {
    pub spotter: Box<dyn WakeSpotter>,
    pub vad: Box<dyn VoiceProbability>,
    pub recognizer: Box<dyn Recognizer>,
    pub synthesizer: Box<dyn Synthesizer>,
    pub sink: Box<dyn AudioSink>,
    pub dialogue: Box<dyn DialogueClient>,
    pub facts: Arc<dyn FactStore>,
}

/// Drives wake detection, capture, dialogue turns, and playback
pub struct Orchestrator {
    config: SessionConfig,
    session: Session,
    gate: VoiceActivityGate,
    capture_started: Option<Duration>,
    dropped: Arc<AtomicU64>,
    last_turn: Option<TurnStats>,
    spotter: Box<dyn WakeSpotter>,
    vad: Box<dyn VoiceProbability>,
    recognizer: Box<dyn Recognizer>,
    synthesizer: Box<dyn Synthesizer>,
    sink: Box<dyn AudioSink>,
    dialogue: Box<dyn DialogueClient>,
    facts: Arc<dyn FactStore>,
}

impl Orchestrator {
    /// Create an orchestrator in `IdleListening`
    #[must_use]
    pub fn new(config: SessionConfig, components: Components) -> Self {
        let Components {
            spotter,
            vad,
            recognizer,
            synthesizer,
            sink,
            dialogue,
            facts,
        } = components;

        Self {
            config,
            session: Session::default(),
            gate: VoiceActivityGate::new(config.gate),
            capture_started: None,
            dropped: Arc::new(AtomicU64::new(0)),
            last_turn: None,
            spotter,
            vad,
            recognizer,
            synthesizer,
            sink,
            dialogue,
            facts,
        }
    }

    /// Current session
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.session.state
    }

    /// Counters from the most recent turn
    #[must_use]
    pub const fn last_turn(&self) -> Option<&TurnStats> {
        self.last_turn.as_ref()
    }

    /// Handle one frame according to the current state
    pub async fn handle_frame(&mut self, frame: &Frame) -> FrameOutcome {
        match self.session.state {
            SessionState::IdleListening => match self.spotter.process(frame) {
                Ok(Some(detection)) => {
                    if self.on_wake(detection) {
                        FrameOutcome::WakeDetected
                    } else {
                        FrameOutcome::Idle
                    }
                }
                Ok(None) => FrameOutcome::Idle,
                Err(e) => {
                    tracing::debug!(sequence = frame.sequence, error = %e, "wake spotter failed");
                    FrameOutcome::Idle
                }
            },
            SessionState::CapturingUtterance => {
                observe(self.spotter.as_mut(), frame);
                self.capture_frame(frame).await
            }
            SessionState::ProcessingTurn | SessionState::Speaking => {
                observe(self.spotter.as_mut(), frame);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(sequence = frame.sequence, state = %self.session.state, "frame dropped");
                FrameOutcome::Dropped
            }
        }
    }

    /// Start capturing for a detected name
    ///
    /// Ignored unless the session is idle. Returns whether capture started.
    pub fn on_wake(&mut self, detection: WakeDetection) -> bool {
        if self.session.state != SessionState::IdleListening {
            tracing::debug!(
                label = %detection.label,
                state = %self.session.state,
                "ignoring wake detection"
            );
            return false;
        }

        tracing::info!(
            label = %detection.label,
            persona = %detection.persona,
            score = detection.score,
            "listening for utterance"
        );

        self.session.state = SessionState::CapturingUtterance;
        self.session.persona = Some(detection.persona);
        self.session.transcript.clear();
        self.gate.reset();
        self.vad.reset();
        self.recognizer.reset();
        self.capture_started = None;
        true
    }

    async fn capture_frame(&mut self, frame: &Frame) -> FrameOutcome {
        let now = frame.timestamp();
        let started = *self.capture_started.get_or_insert(now);

        let mut endpoint = false;
        match self.recognizer.process(frame).await {
            Ok(update) => {
                if let Some(partial) = update.partial {
                    tracing::trace!(partial, "partial transcript");
                    self.session.transcript.set_partial(partial);
                }
                endpoint = update.endpoint;
            }
            Err(e) => {
                tracing::warn!(sequence = frame.sequence, error = %e, "recognizer failed on frame");
            }
        }

        let mut finalize = false;
        match self.vad.probability(frame) {
            Ok(probability) => finalize = self.gate.update(probability, now),
            Err(e) => {
                tracing::warn!(sequence = frame.sequence, error = %e, "voice activity failed on frame");
            }
        }

        let elapsed = now.saturating_sub(started);
        if endpoint || finalize {
            return self.finalize_capture().await;
        }

        if !self.gate.is_speaking()
            && self.session.transcript.is_empty()
            && elapsed >= self.config.no_speech_timeout
        {
            tracing::info!("no speech after wake word, returning to idle");
            self.return_to_idle();
            return FrameOutcome::Discarded;
        }

        if elapsed >= self.config.max_utterance {
            tracing::info!("utterance reached maximum length");
            return self.finalize_capture().await;
        }

        FrameOutcome::Capturing
    }

    async fn finalize_capture(&mut self) -> FrameOutcome {
        let limit = self.config.response_timeout;
        match within(limit, "transcription", self.recognizer.flush()).await {
            Ok(Ok(text)) => self.session.transcript.commit(&text),
            Ok(Err(e)) | Err(e) => {
                tracing::warn!(error = %e, "recognizer flush failed");
                self.session.transcript.commit("");
            }
        }

        if self.session.transcript.text().trim().is_empty() {
            tracing::info!("empty utterance, returning to idle");
            self.return_to_idle();
            return FrameOutcome::Discarded;
        }

        tracing::debug!(transcript = %self.session.transcript.text(), "utterance finalized");
        self.session.state = SessionState::ProcessingTurn;
        FrameOutcome::TurnReady
    }

    /// Run the pending turn to completion or failure
    ///
    /// Always leaves the session in `IdleListening`.
    pub async fn run_turn(&mut self) -> TurnOutcome {
        let Some(pending) = self.begin_turn() else {
            return TurnOutcome::Aborted("no turn pending".to_string());
        };

        let mut response = String::new();
        let (mut turn, _) = self.split_for_turn();
        let result = turn.execute(&pending, &mut response).await;
        self.finish_turn(&pending, result, &response)
    }

    fn begin_turn(&mut self) -> Option<PendingTurn> {
        if self.session.state != SessionState::ProcessingTurn {
            return None;
        }

        self.session.turn += 1;
        Some(PendingTurn {
            request: self.session.transcript.text(),
            persona: self.session.persona.clone(),
            started: Instant::now(),
        })
    }

    fn split_for_turn(&mut self) -> (TurnContext<'_>, &mut dyn WakeSpotter) {
        (
            TurnContext {
                limit: self.config.response_timeout,
                streaming: self.config.streaming_tts,
                state: &mut self.session.state,
                dialogue: self.dialogue.as_mut(),
                synthesizer: self.synthesizer.as_ref(),
                sink: self.sink.as_mut(),
                facts: self.facts.as_ref(),
            },
            self.spotter.as_mut(),
        )
    }

    fn finish_turn(
        &mut self,
        pending: &PendingTurn,
        result: Result<TurnOutcome>,
        response: &str,
    ) -> TurnOutcome {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_connection_failure() {
                    tracing::warn!(error = %e, "dialogue backend unavailable, turn aborted");
                } else {
                    tracing::warn!(error = %e, "turn aborted");
                }
                TurnOutcome::Aborted(e.to_string())
            }
        };

        let stats = TurnStats {
            turn: self.session.turn,
            persona: pending.persona.clone(),
            request_chars: pending.request.chars().count(),
            response_chars: response.chars().count(),
            elapsed: pending.started.elapsed(),
            dropped_frames: self.dropped.swap(0, Ordering::Relaxed),
        };
        stats.log(&outcome);
        self.last_turn = Some(stats);

        self.return_to_idle();
        outcome
    }

    fn return_to_idle(&mut self) {
        self.session.state = SessionState::IdleListening;
        self.session.persona = None;
        self.session.transcript.clear();
        self.capture_started = None;
        self.gate.reset();
        self.vad.reset();
        self.recognizer.reset();
        self.spotter.reset();
    }

    /// Drive the session from a frame stream until it ends or `shutdown`
    /// resolves
    ///
    /// # Errors
    ///
    /// Currently infallible; reserved for fatal collaborator failures
    pub async fn run<S>(&mut self, mut frames: S, shutdown: impl Future<Output = ()>) -> Result<()>
    where
        S: Stream<Item = Frame> + Unpin,
    {
        tokio::pin!(shutdown);
        tracing::info!(labels = ?self.spotter.labels(), "listening");

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    return Ok(());
                }
                frame = frames.next() => {
                    let Some(frame) = frame else {
                        tracing::info!("frame source ended");
                        return Ok(());
                    };

                    if self.handle_frame(&frame).await != FrameOutcome::TurnReady {
                        continue;
                    }
                    let Some(pending) = self.begin_turn() else {
                        continue;
                    };

                    let dropped = Arc::clone(&self.dropped);
                    let mut response = String::new();
                    let mut source_open = true;

                    let (mut context, spotter) = self.split_for_turn();
                    let result = {
                        let turn = context.execute(&pending, &mut response);
                        tokio::pin!(turn);

                        loop {
                            tokio::select! {
                                result = &mut turn => break result,
                                () = &mut shutdown => {
                                    tracing::info!("shutdown requested during turn");
                                    return Ok(());
                                }
                                frame = frames.next(), if source_open => {
                                    if let Some(frame) = frame {
                                        observe(spotter, &frame);
                                        dropped.fetch_add(1, Ordering::Relaxed);
                                    } else {
                                        source_open = false;
                                    }
                                }
                            }
                        }
                    };
                    self.finish_turn(&pending, result, &response);

                    if !source_open {
                        tracing::info!("frame source ended");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Request and bookkeeping for the turn in flight
struct PendingTurn {
    request: String,
    persona: Option<String>,
    started: Instant,
}

/// The collaborators a turn drives, borrowed apart from the wake spotter
struct TurnContext<'a> {
    limit: Duration,
    streaming: bool,
    state: &'a mut SessionState,
    dialogue: &'a mut dyn DialogueClient,
    synthesizer: &'a dyn Synthesizer,
    sink: &'a mut dyn AudioSink,
    facts: &'a dyn FactStore,
}

impl TurnContext<'_> {
    async fn execute(
        &mut self,
        pending: &PendingTurn,
        response: &mut String,
    ) -> Result<TurnOutcome> {
        let limit = self.limit;

        if let Some(persona) = pending.persona.as_deref()
            && self.dialogue.selected_persona() != Some(persona)
        {
            within(limit, "persona switch", self.dialogue.switch_persona(persona)).await??;
            if let Err(e) = self.facts.set(LAST_PERSONA_KEY, persona) {
                tracing::warn!(error = %e, "failed to persist last persona");
            }
        }

        let mut increments = within(
            limit,
            "turn submission",
            self.dialogue.submit_turn(&pending.request),
        )
        .await??;

        if self.streaming {
            let Some(first) = within(limit, "response", increments.next()).await? else {
                return Ok(TurnOutcome::Empty);
            };
            let first = first?;

            *self.state = SessionState::Speaking;
            let text = stream::once(async move { Ok(first) })
                .chain(timed(increments, limit))
                .inspect(|item| {
                    if let Ok(text) = item {
                        response.push_str(text);
                    }
                })
                .boxed();

            let mut audio = self.synthesizer.synthesize_stream(text);
            while let Some(chunk) = within(limit, "speech synthesis", audio.next()).await? {
                self.sink.write(chunk?).await?;
            }
            drop(audio);
            self.sink.flush().await?;
        } else {
            while let Some(increment) = within(limit, "response", increments.next()).await? {
                response.push_str(&increment?);
            }
            drop(increments);

            if response.trim().is_empty() {
                return Ok(TurnOutcome::Empty);
            }

            *self.state = SessionState::Speaking;
            let audio =
                within(limit, "speech synthesis", self.synthesizer.synthesize(response)).await??;
            self.sink.play(audio).await?;
        }

        Ok(TurnOutcome::Spoken)
    }
}

/// Feed a frame to the spotter outside `IdleListening`, discarding detections
fn observe(spotter: &mut dyn WakeSpotter, frame: &Frame) {
    match spotter.process(frame) {
        Ok(Some(detection)) => {
            tracing::debug!(label = %detection.label, "ignoring wake detection while busy");
        }
        Ok(None) => {}
        Err(e) => {
            tracing::debug!(sequence = frame.sequence, error = %e, "wake spotter failed");
        }
    }
}

async fn within<T>(limit: Duration, what: &str, fut: impl Future<Output = T>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(format!("{what} after {}ms", limit.as_millis())))
}

/// Bound each wait for the next item; a timeout ends the stream with an error
fn timed<'a>(
    inner: BoxStream<'a, Result<String>>,
    limit: Duration,
) -> impl Stream<Item = Result<String>> + Send + 'a {
    stream::unfold(Some(inner), move |inner| async move {
        let mut inner = inner?;
        match within(limit, "response", inner.next()).await {
            Ok(Some(Ok(text))) => Some((Ok(text), Some(inner))),
            Ok(Some(Err(e))) | Err(e) => Some((Err(e), None)),
            Ok(None) => None,
        }
    })
}
