//! Bridge events published to session subscribers

use serde::Serialize;
use voice_bridge_pipeline::{Direction, TurnState};

/// Observable bridge activity
///
/// Purely informational: nothing in the bridge waits on subscribers, and a
/// lagging subscriber only loses events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    StateChanged { from: TurnState, to: TurnState },
    /// Final caller transcript
    CallerTranscript { text: String },
    /// Final assistant transcript or reply text
    AssistantTranscript { text: String },
    /// Assistant response fully produced
    TurnCompleted,
    /// Turn ended without assistant audio
    TurnAbandoned { reason: String },
    BargeIn,
    Overrun {
        #[serde(serialize_with = "direction_name")]
        direction: Direction,
        dropped: u64,
    },
    SessionLost { reason: String },
    SessionRestored { attempt: u32 },
    /// Streaming session could not be reopened; silent until the call ends
    Degraded,
}

fn direction_name<S: serde::Serializer>(direction: &Direction, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(direction.as_str())
}
