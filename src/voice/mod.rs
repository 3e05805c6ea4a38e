//! Voice I/O
//!
//! Microphone framing, voice activity gating, wake word spotting,
//! recognition, synthesis, and playback.

mod capture;
mod frame;
mod playback;
mod stt;
mod tts;
mod vad;
mod wake_process;
mod wake_word;

pub use capture::{AudioCapture, Framer, samples_to_wav};
pub use frame::{AudioBuffer, FRAME_LENGTH, Frame, SAMPLE_RATE, f32_to_i16};
pub use playback::{AudioPlayback, AudioSink, PLAYBACK_SAMPLE_RATE};
pub use stt::{DEFAULT_API_BASE, HTTP_TIMEOUT, HttpRecognizer, Recognizer, RecognizerUpdate};
pub use tts::{HttpSynthesizer, SentenceSplitter, Synthesizer, sentences};
pub use vad::{
    EnergyProbability, GateConfig, SileroProbability, VoiceActivityGate, VoiceProbability,
    calculate_energy,
};
pub use wake_process::{
    ProcessSpotter, ProcessSpotterConfig, STALE_WINDOW_SAMPLES, ServerEvent, parse_event,
};
pub use wake_word::{
    DEFAULT_WAKE_THRESHOLD, PipelineSpotter, RegisteredName, WakeDetection, WakeSpotter,
};
