//! Per-call voice bridge
//!
//! Features:
//! - `BridgeSession`: the per-call owner of queues, resamplers, turn state
//!   and history, attached to a call adapter
//! - Sequential bridge: transcribe, reason and synthesize per caller turn
//! - Full-duplex bridge: one persistent streaming session with
//!   backend-driven turn signals and barge-in
//! - Paced playout into the bounded outbound queue
//! - Bridge events over a broadcast channel, turn state over a watch channel

pub mod bridge;
pub mod call;
pub mod duplex;
pub mod events;
pub mod factory;
pub mod metrics;
pub mod playout;
pub mod sequential;
pub mod session;

pub use bridge::Bridge;
pub use call::{CallAdapter, CallContext};
pub use duplex::{DuplexBridge, DuplexConfig};
pub use events::BridgeEvent;
pub use factory::build_bridge;
pub use playout::Playout;
pub use sequential::{SequentialBridge, SequentialConfig, TurnOutcome};
pub use session::{BridgeSession, SessionConfig};

use thiserror::Error;
use voice_bridge_config::ConfigError;
use voice_bridge_core::Error as CoreError;
use voice_bridge_llm::LlmError;
use voice_bridge_pipeline::PipelineError;

/// Errors surfaced while building or starting a bridge
///
/// Nothing here is raised once a call is running: turn and session
/// failures are reported through [`BridgeEvent`] instead.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No tokio runtime available to run the bridge worker")]
    NoRuntime,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Backend error: {0}")]
    Backend(#[from] LlmError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversions() {
        let err: AgentError = PipelineError::InvalidAudioFormat("8000 vs 16000".into()).into();
        assert!(matches!(err, AgentError::Pipeline(_)));

        let err: AgentError = LlmError::Configuration("missing key".into()).into();
        assert!(err.to_string().contains("missing key"));

        let err: AgentError = CoreError::ChannelClosed.into();
        assert_eq!(err.to_string(), "Channel closed");
    }
}
