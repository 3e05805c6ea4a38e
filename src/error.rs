//! Error types for the Parley gateway

use thiserror::Error;

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Parley gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Wake word engine error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Voice activity engine error
    #[error("vad error: {0}")]
    Vad(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Malformed tensor or feature shape inside the feature pipeline
    #[error("pipeline shape error: {0}")]
    Pipeline(String),

    /// Dialogue backend signalled an explicit error
    #[error("dialogue error: {0}")]
    Dialogue(String),

    /// Dialogue backend unreachable or connection lost
    #[error("connection error: {0}")]
    Connection(String),

    /// A bounded wait exceeded its deadline
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether this error means the dialogue backend could not be reached in time
    #[must_use]
    pub const fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::WebSocket(_) | Self::Http(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failure_classification() {
        assert!(Error::Timeout("turn response".to_string()).is_connection_failure());
        assert!(Error::Connection("refused".to_string()).is_connection_failure());
        assert!(!Error::Dialogue("unknown persona".to_string()).is_connection_failure());
        assert!(!Error::Config("no names".to_string()).is_connection_failure());
    }
}
