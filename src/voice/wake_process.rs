//! External wake word detection server
//!
//! Speaks a JSON-lines protocol over the child's stdio: raw 16-bit
//! little-endian PCM frames go in on stdin, events come out on stdout.
//!
//! ```text
//! {"type": "ready", "models": ["hey_luna", "hey_sol"]}
//! {"type": "detection", "model": "hey_luna", "score": 0.92}
//! {"type": "error", "message": "..."}
//! {"type": "warning", "message": "..."}
//! ```

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::time::Duration;

use serde::Deserialize;

use super::frame::Frame;
use super::wake_word::{RegisteredName, WakeDetection, WakeSpotter};
use crate::pipeline::{CHUNK_SAMPLES, DEFAULT_FRAMES_PER_CHUNK, RECEPTIVE_FIELD_MEL};
use crate::{Error, Result};

/// Frames queued for the server before new ones are dropped
const WRITE_QUEUE: usize = 16;

/// Audio the server must hear after a detection before its windows hold
/// none of the detected audio
pub const STALE_WINDOW_SAMPLES: usize =
    CHUNK_SAMPLES * RECEPTIVE_FIELD_MEL.div_ceil(DEFAULT_FRAMES_PER_CHUNK);

/// Event emitted by the detection server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Models loaded, ready for audio
    Ready {
        #[serde(default)]
        models: Vec<String>,
    },
    /// A model scored above the server threshold
    Detection { model: String, score: f32 },
    /// Server-side failure
    Error { message: String },
    /// Non-fatal server notice
    Warning { message: String },
}

/// Launch parameters for the detection server
#[derive(Debug, Clone)]
pub struct ProcessSpotterConfig {
    /// Executable (e.g. "python3")
    pub command: String,
    /// Leading arguments (e.g. the server script path)
    pub args: Vec<String>,
    /// Default detection threshold for names without a sensitivity
    pub threshold: f32,
    /// Samples per frame written to stdin
    pub frame_length: usize,
    /// How long to wait for the ready event
    pub ready_timeout: Duration,
}

/// Wake spotter that delegates classification to a child process
///
/// Frames are handed to a writer thread through a bounded queue, so a
/// stalled server drops audio instead of blocking the caller. After
/// [`WakeSpotter::reset`] detections stay muted until the server has heard
/// [`STALE_WINDOW_SAMPLES`] of audio since the last detection.
pub struct ProcessSpotter {
    child: Child,
    writer: Option<SyncSender<Vec<u8>>>,
    events: Receiver<ServerEvent>,
    names: Vec<RegisteredName>,
    default_threshold: f32,
    since_detection: Option<usize>,
    muted: bool,
}

impl ProcessSpotter {
    /// Spawn the server and wait for it to report ready
    ///
    /// The server threshold is the lowest effective threshold across all
    /// names; each name's own threshold is applied to its detections here.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the server cannot start, reports an error
    /// before becoming ready, or does not become ready in time
    pub fn spawn(config: &ProcessSpotterConfig, names: Vec<RegisteredName>) -> Result<Self> {
        let server_threshold = server_threshold(&names, config.threshold);

        let mut command = Command::new(&config.command);
        command.args(&config.args);
        if !names.is_empty() {
            command.arg("--models");
            command.args(names.iter().map(|n| n.model.as_os_str()));
        }
        command
            .arg("--threshold")
            .arg(server_threshold.to_string())
            .arg("--frame-size")
            .arg(config.frame_length.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            Error::Config(format!(
                "failed to start wake word server '{}': {e}",
                config.command
            ))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Config("wake word server stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Config("wake word server stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            std::thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(std::result::Result::ok) {
                    tracing::debug!(target: "parley_gateway::wake_server", "{line}");
                }
            });
        }

        let (tx, events) = mpsc::channel();
        std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(std::result::Result::ok) {
                match parse_event(&line) {
                    Some(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    None => tracing::trace!(line, "ignoring unrecognized wake server output"),
                }
            }
        });

        let (writer, frames) = mpsc::sync_channel::<Vec<u8>>(WRITE_QUEUE);
        std::thread::spawn(move || {
            for bytes in frames {
                if let Err(e) = stdin.write_all(&bytes).and_then(|()| stdin.flush()) {
                    tracing::debug!(error = %e, "wake word server stopped reading");
                    break;
                }
            }
        });

        tracing::debug!(threshold = server_threshold, "wake word server spawned");

        let mut spotter = Self {
            child,
            writer: Some(writer),
            events,
            names,
            default_threshold: config.threshold,
            since_detection: None,
            muted: false,
        };
        spotter.wait_ready(config.ready_timeout)?;
        Ok(spotter)
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<()> {
        loop {
            match self.events.recv_timeout(timeout) {
                Ok(ServerEvent::Ready { models }) => {
                    if models.is_empty() {
                        tracing::warn!("wake word server loaded no models");
                    }
                    for name in &self.names {
                        if !models.iter().any(|m| name.matches_model(m)) {
                            tracing::warn!(label = %name.label, "registered name not reported by wake word server");
                        }
                    }
                    tracing::info!(?models, "wake word server ready");
                    return Ok(());
                }
                Ok(ServerEvent::Error { message }) => {
                    return Err(Error::Config(format!("wake word server failed: {message}")));
                }
                Ok(ServerEvent::Warning { message }) => {
                    tracing::warn!(message, "wake word server warning");
                }
                Ok(ServerEvent::Detection { .. }) => {}
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Error::Config(
                        "wake word server did not become ready in time".to_string(),
                    ));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Config(
                        "wake word server exited before becoming ready".to_string(),
                    ));
                }
            }
        }
    }

    fn resolve(&self, model: &str, score: f32, sequence: u64) -> Option<WakeDetection> {
        let name = self.names.iter().find(|n| n.matches_model(model))?;
        if score < name.threshold(self.default_threshold) {
            return None;
        }
        Some(WakeDetection {
            label: name.label.clone(),
            persona: name.persona.clone(),
            score,
            sequence,
        })
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| Error::WakeWord("wake word server closed".to_string()))?;

        let bytes: Vec<u8> = frame.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        match writer.try_send(bytes) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::trace!(sequence = frame.sequence, "wake word server busy, frame dropped");
                return Ok(());
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(Error::WakeWord(
                    "wake word server stopped reading audio".to_string(),
                ));
            }
        }

        if let Some(since) = &mut self.since_detection {
            *since = since.saturating_add(frame.samples.len());
        }
        Ok(())
    }

    fn is_stale(&self) -> bool {
        self.since_detection
            .is_some_and(|since| since < STALE_WINDOW_SAMPLES)
    }
}

impl WakeSpotter for ProcessSpotter {
    fn process(&mut self, frame: &Frame) -> Result<Option<WakeDetection>> {
        self.write(frame)?;

        let mut best: Option<WakeDetection> = None;
        loop {
            match self.events.try_recv() {
                Ok(ServerEvent::Detection { model, score }) => {
                    match self.resolve(&model, score, frame.sequence) {
                        Some(d) if best.as_ref().is_none_or(|b| d.score > b.score) => {
                            best = Some(d);
                        }
                        Some(_) => {}
                        None => tracing::debug!(model, score, "ignoring unmatched detection"),
                    }
                }
                Ok(ServerEvent::Error { message }) => {
                    tracing::warn!(message, "wake word server error");
                }
                Ok(ServerEvent::Warning { message }) => {
                    tracing::debug!(message, "wake word server warning");
                }
                Ok(ServerEvent::Ready { .. }) => {}
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(Error::WakeWord("wake word server exited".to_string()));
                }
            }
        }

        if self.muted && !self.is_stale() {
            self.muted = false;
        }

        let Some(detection) = best else {
            return Ok(None);
        };

        if self.muted {
            tracing::debug!(label = %detection.label, score = detection.score, "ignoring detection from stale server window");
            self.since_detection = Some(0);
            return Ok(None);
        }

        self.since_detection = Some(0);
        tracing::info!(label = %detection.label, score = detection.score, "wake word detected");
        Ok(Some(detection))
    }

    fn reset(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            if let ServerEvent::Detection { model, score } = event
                && self.resolve(&model, score, 0).is_some()
            {
                self.since_detection = Some(0);
            }
        }
        self.muted = self.is_stale();
    }

    fn labels(&self) -> Vec<String> {
        self.names.iter().map(|n| n.label.clone()).collect()
    }
}

impl Drop for ProcessSpotter {
    fn drop(&mut self) {
        self.writer = None;
        if let Err(e) = self.child.kill() {
            tracing::debug!(error = %e, "wake word server already stopped");
        }
        let _ = self.child.wait();
    }
}

/// Threshold handed to the server: the lowest any name will accept
fn server_threshold(names: &[RegisteredName], default: f32) -> f32 {
    names
        .iter()
        .map(|n| n.threshold(default))
        .fold(default, f32::min)
}

/// Parse one line of server output
#[must_use]
pub fn parse_event(line: &str) -> Option<ServerEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ready() {
        assert_eq!(
            parse_event(r#"{"type": "ready", "models": ["hey_luna", "alexa"]}"#),
            Some(ServerEvent::Ready {
                models: vec!["hey_luna".to_string(), "alexa".to_string()]
            })
        );
    }

    #[test]
    fn test_parse_detection() {
        let event = parse_event(r#"{"type": "detection", "model": "hey_luna", "score": 0.92}"#);
        assert!(matches!(
            event,
            Some(ServerEvent::Detection { ref model, score }) if model == "hey_luna" && (score - 0.92).abs() < 1e-6
        ));
    }

    #[test]
    fn test_server_threshold_is_lowest_sensitivity() {
        let name = |label: &str, sensitivity| RegisteredName {
            label: label.to_string(),
            model: format!("{label}.onnx").into(),
            persona: label.to_string(),
            sensitivity,
        };

        assert!((server_threshold(&[name("luna", None)], 0.5) - 0.5).abs() < f32::EPSILON);
        assert!(
            (server_threshold(&[name("luna", None), name("sol", Some(0.3))], 0.5) - 0.3).abs()
                < f32::EPSILON
        );
        // A stricter name never raises the server threshold
        assert!((server_threshold(&[name("sol", Some(0.8))], 0.5) - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_stale_window_covers_receptive_field() {
        assert_eq!(STALE_WINDOW_SAMPLES, 40 * CHUNK_SAMPLES);
    }

    #[test]
    fn test_parse_error_and_garbage() {
        assert_eq!(
            parse_event(r#"{"type": "error", "message": "openwakeword not installed"}"#),
            Some(ServerEvent::Error {
                message: "openwakeword not installed".to_string()
            })
        );
        assert_eq!(parse_event("Traceback (most recent call last):"), None);
        assert_eq!(parse_event(""), None);
        assert_eq!(parse_event(r#"{"type": "heartbeat"}"#), None);
    }
}
