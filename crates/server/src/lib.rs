//! Voice Bridge Server
//!
//! Runs a bridge session against a simulated call: caller audio is played
//! from a WAV file and the assistant's side is recorded to another.

pub mod metrics;
pub mod simulator;

pub use metrics::init_metrics;
pub use simulator::{simulate, SimulationReport, WavCallAdapter};

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unsupported input audio: {0}")]
    InvalidInput(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] voice_bridge_agent::AgentError),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
