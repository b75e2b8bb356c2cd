//! Full-duplex streaming session trait and its event vocabulary

use crate::{AudioFrame, Result, SampleRate, TurnRole};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Parameters sent to the backend when a streaming session opens
#[derive(Debug, Clone)]
pub struct RealtimeSessionConfig {
    /// Model identifier
    pub model: String,
    /// Output voice
    pub voice: String,
    /// System instructions
    pub instructions: String,
    /// Rate of audio in both directions
    pub sample_rate: SampleRate,
    /// Server-side VAD sensitivity (0.0 - 1.0)
    pub vad_threshold: f32,
    /// Audio kept before detected speech start
    pub prefix_padding_ms: u32,
    /// Silence that ends a caller turn on the server side
    pub silence_duration_ms: u32,
}

/// Messages from the bridge to the streaming backend
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Caller audio at the session rate
    AppendAudio(AudioFrame),
    /// Ask the backend to answer the committed caller turn
    CreateResponse,
    /// Abort the response in progress
    CancelResponse,
}

/// Events from the streaming backend
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Session configured, audio may flow
    Ready,
    /// Backend detected the caller starting to speak
    SpeechStarted,
    /// Backend detected the caller finishing a turn
    SpeechStopped,
    /// A response started generating
    ResponseStarted,
    /// Chunk of synthesized audio at the session rate
    AudioDelta(AudioFrame),
    /// Partial or final transcript, informational
    Transcript {
        role: TurnRole,
        text: String,
        is_final: bool,
    },
    /// The current response finished generating
    ResponseDone,
    /// Backend-reported error
    Error { message: String },
}

/// An open streaming session
///
/// Dropping `commands` closes the session. `events` yields `None` once the
/// connection is gone.
#[derive(Debug)]
pub struct RealtimeLink {
    pub commands: mpsc::Sender<ClientEvent>,
    pub events: mpsc::Receiver<ServerEvent>,
}

impl RealtimeLink {
    /// Link plus the opposite channel ends, for in-process backends
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<ClientEvent>, mpsc::Sender<ServerEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
        let (evt_tx, evt_rx) = mpsc::channel(capacity);
        (
            Self {
                commands: cmd_tx,
                events: evt_rx,
            },
            cmd_rx,
            evt_tx,
        )
    }
}

/// Opens persistent full-duplex sessions
#[async_trait]
pub trait RealtimeConnector: Send + Sync + 'static {
    /// Open and configure a session
    async fn connect(&self, config: &RealtimeSessionConfig) -> Result<RealtimeLink>;

    /// Backend name for logging
    fn name(&self) -> &str;
}
