//! Error types for the voice bridge

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Remote backend stage that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteStage {
    /// Speech-to-text request
    Transcribe,
    /// Text-in/text-out reasoning request
    Reason,
    /// Text-to-speech request
    Synthesize,
    /// Persistent full-duplex streaming session
    Stream,
}

impl RemoteStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStage::Transcribe => "transcribe",
            RemoteStage::Reason => "reason",
            RemoteStage::Synthesize => "synthesize",
            RemoteStage::Stream => "stream",
        }
    }
}

impl std::fmt::Display for RemoteStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the voice bridge
///
/// Audio-path errors never end a call. Only the call adapter decides when a
/// call is over; everything here is either fatal to a single operation
/// (`InvalidAudioFormat`), fatal to a single turn (`RemoteCall`, `Timeout`)
/// or a degradation signal (`QueueOverrun`, `SessionLost`).
#[derive(Error, Debug)]
pub enum Error {
    /// Rate or size mismatch. Never silently coerced.
    #[error("Invalid audio format: {0}")]
    InvalidAudioFormat(String),

    /// Network or backend error during a remote call
    #[error("Remote {stage} call failed: {message}")]
    RemoteCall { stage: RemoteStage, message: String },

    /// A remote call exceeded its configured deadline
    #[error("Remote {stage} call timed out after {after_ms}ms")]
    Timeout { stage: RemoteStage, after_ms: u64 },

    /// Frames were dropped under backpressure
    #[error("Queue overrun: {dropped} frame(s) dropped")]
    QueueOverrun { dropped: u64 },

    /// Streaming connection dropped
    #[error("Streaming session lost: {0}")]
    SessionLost(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build a remote-call failure for the given stage
    pub fn remote(stage: RemoteStage, message: impl Into<String>) -> Self {
        Error::RemoteCall {
            stage,
            message: message.into(),
        }
    }

    /// Whether the call can carry on after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Config(_))
    }

    /// Remote stage this error belongs to, if any
    pub fn stage(&self) -> Option<RemoteStage> {
        match self {
            Error::RemoteCall { stage, .. } | Error::Timeout { stage, .. } => Some(*stage),
            Error::SessionLost(_) => Some(RemoteStage::Stream),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        let err = Error::remote(RemoteStage::Transcribe, "connection reset");
        assert_eq!(
            err.to_string(),
            "Remote transcribe call failed: connection reset"
        );
        assert_eq!(err.stage(), Some(RemoteStage::Transcribe));
    }

    #[test]
    fn test_recoverability() {
        assert!(Error::QueueOverrun { dropped: 3 }.is_recoverable());
        assert!(Error::SessionLost("eof".into()).is_recoverable());
        assert!(Error::InvalidAudioFormat("odd length".into()).is_recoverable());
        assert!(!Error::Config("bad".into()).is_recoverable());
    }
}
