//! Bridge metrics
//!
//! Recorded through the `metrics` facade; without an installed recorder
//! every call is a no-op.

use metrics::{counter, histogram};
use std::time::Duration;
use voice_bridge_core::RemoteStage;

/// How a caller turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcomeLabel {
    /// Assistant audio was produced
    Completed,
    /// A remote step failed, timed out or was interrupted
    Abandoned,
    /// Too little voiced audio to process
    Discarded,
}

impl TurnOutcomeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnOutcomeLabel::Completed => "completed",
            TurnOutcomeLabel::Abandoned => "abandoned",
            TurnOutcomeLabel::Discarded => "discarded",
        }
    }
}

/// Record a finished caller turn
pub fn record_turn(outcome: TurnOutcomeLabel) {
    counter!("voice_bridge_turns_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record the latency of one remote call, successful or not
pub fn record_remote_call(stage: RemoteStage, elapsed: Duration) {
    histogram!("voice_bridge_remote_call_seconds", "stage" => stage.as_str())
        .record(elapsed.as_secs_f64());
}

pub fn record_barge_in() {
    counter!("voice_bridge_barge_ins_total").increment(1);
}

/// Record one attempt to reopen the streaming session
pub fn record_reconnect(restored: bool) {
    let outcome = if restored { "restored" } else { "failed" };
    counter!("voice_bridge_session_reconnects_total", "outcome" => outcome).increment(1);
}

/// Record a message dropped on a full streaming send buffer
pub fn record_stream_drop() {
    counter!("voice_bridge_queue_overruns_total", "direction" => "stream").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_helpers() {
        // no recorder installed, must not panic
        record_turn(TurnOutcomeLabel::Completed);
        record_turn(TurnOutcomeLabel::Discarded);
        record_remote_call(RemoteStage::Reason, Duration::from_millis(420));
        record_barge_in();
        record_reconnect(false);
        record_stream_drop();
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(TurnOutcomeLabel::Abandoned.as_str(), "abandoned");
        assert_eq!(TurnOutcomeLabel::Discarded.as_str(), "discarded");
    }
}
