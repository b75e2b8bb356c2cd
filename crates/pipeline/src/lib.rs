//! Audio pipeline between the call adapter and the bridges
//!
//! This crate provides the real-time side of the voice bridge:
//! - Anti-aliased resampling between telephony and backend rates
//! - Bounded, drop-oldest frame queues (one per direction)
//! - Energy-based voice activity detection with hangover
//! - The turn controller state machine (silence timer, barge-in)

pub mod queue;
pub mod resampler;
pub mod turn_detection;
pub mod vad;

pub use queue::{Direction, FrameQueue, PushOutcome};
pub use resampler::{resample, resample_frame, StreamResampler};
pub use turn_detection::{
    BargeInPolicy, TurnController, TurnControllerConfig, TurnEvent, TurnSignal, TurnState,
};
pub use vad::{EnergyVad, VadConfig, VadDecision, VadResult};

use thiserror::Error;
use voice_bridge_core::Error as CoreError;

/// Pipeline errors
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Invalid audio format: {0}")]
    InvalidAudioFormat(String),

    #[error("Resampler error: {0}")]
    Resampler(String),
}

impl From<PipelineError> for CoreError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::InvalidAudioFormat(msg) => CoreError::InvalidAudioFormat(msg),
            PipelineError::Resampler(msg) => {
                CoreError::InvalidAudioFormat(format!("resampler: {}", msg))
            },
        }
    }
}

impl From<CoreError> for PipelineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidAudioFormat(msg) => PipelineError::InvalidAudioFormat(msg),
            other => PipelineError::InvalidAudioFormat(other.to_string()),
        }
    }
}
