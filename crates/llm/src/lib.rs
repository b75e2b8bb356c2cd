//! Remote speech and reasoning backends
//!
//! Features:
//! - OpenAI-compatible HTTP transcription, chat completion and speech synthesis
//! - Retry with exponential backoff for transient failures
//! - Realtime WebSocket sessions for the full-duplex bridge

pub mod chat;
pub mod http;
pub mod realtime;
pub mod speech;
pub mod transcription;
pub mod wav;

pub use chat::{ChatConfig, HttpChat};
pub use http::{attempt_timeout, HttpClient, HttpConfig};
pub use realtime::{OpenAiRealtime, RealtimeConfig};
pub use speech::{HttpSynthesizer, SpeechConfig};
pub use transcription::{HttpTranscriber, TranscriptionConfig};

use thiserror::Error;
use voice_bridge_core::{Error as CoreError, RemoteStage};

/// Backend errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LlmError {
    /// Connect errors, timeouts, 429 and 5xx are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Network(_) | LlmError::Timeout => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Attach the remote stage this error happened in
    pub fn at(self, stage: RemoteStage) -> CoreError {
        match self {
            LlmError::Configuration(msg) => CoreError::Config(msg),
            other => CoreError::remote(stage, other.to_string()),
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LlmError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Http(response) => LlmError::Api {
                status: response.status().as_u16(),
                message: "realtime handshake rejected".to_string(),
            },
            other => LlmError::Network(other.to_string()),
        }
    }
}
