//! Turn detection
//!
//! Decides when a caller turn has ended (silence timer over VAD output) and
//! when assistant playback is interrupted. Bridge completion and backend
//! turn signals enter through [`TurnController::apply`].

mod controller;

pub use controller::{
    BargeInPolicy, TurnController, TurnControllerConfig, TurnEvent, TurnSignal, TurnState,
};
