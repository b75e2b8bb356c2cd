//! Voice Activity Detection
//!
//! Energy-based detector: a frame is speech when its RMS level reaches the
//! configured dBFS threshold. A hangover of consecutive low-energy frames is
//! required before speech is reported as ended, so short dips between words
//! don't flicker the decision.
//!
//! This is a level heuristic, not a speech model. Sustained background noise
//! above the threshold reads as speech and very quiet speech reads as silence.

mod energy;

pub use energy::{EnergyVad, VadConfig};

/// Binary speech/silence decision after hangover smoothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    Speech,
    Silence,
}

/// Per-frame detector output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadResult {
    /// No speech, none pending
    Silence,
    /// First loud frame after silence
    SpeechStart,
    /// Loud frame while in speech
    SpeechContinue,
    /// Quiet frame inside the hangover window, still reported as speech
    PotentialSpeechEnd,
    /// Hangover exhausted, speech has ended
    SpeechEnd,
}

impl VadResult {
    /// Smoothed decision: speech until the hangover runs out
    pub fn is_speech(&self) -> bool {
        matches!(
            self,
            VadResult::SpeechStart | VadResult::SpeechContinue | VadResult::PotentialSpeechEnd
        )
    }

    /// Whether this frame itself was above the threshold
    pub fn is_voiced_frame(&self) -> bool {
        matches!(self, VadResult::SpeechStart | VadResult::SpeechContinue)
    }

    pub fn decision(&self) -> VadDecision {
        if self.is_speech() {
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }
}
