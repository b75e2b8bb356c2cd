//! Turn controller state machine

use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};
use voice_bridge_core::{AudioFrame, Utterance};

use crate::vad::VadResult;
use crate::PipelineError;

/// Conversation turn state, exactly one per call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Nobody is speaking
    #[default]
    Idle,
    /// Caller is speaking
    CallerSpeaking,
    /// Caller paused, silence timer running
    CallerSilencePending,
    /// Caller turn handed to the bridge
    Processing,
    /// Assistant audio is playing
    AssistantSpeaking,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::CallerSpeaking => "caller_speaking",
            TurnState::CallerSilencePending => "caller_silence_pending",
            TurnState::Processing => "processing",
            TurnState::AssistantSpeaking => "assistant_speaking",
        }
    }

    /// Caller holds the floor
    pub fn is_caller_turn(&self) -> bool {
        matches!(self, TurnState::CallerSpeaking | TurnState::CallerSilencePending)
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caller speech does while the assistant is playing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BargeInPolicy {
    /// Stop playback and start a new caller turn
    Interrupt,
    /// Let the response play to completion
    Ignore,
}

/// Turn controller configuration
#[derive(Debug, Clone)]
pub struct TurnControllerConfig {
    /// Silence that ends a caller turn
    pub silence_duration: Duration,
    /// Voiced audio below this is discarded instead of processed
    pub min_utterance: Duration,
    /// Utterances are finalized at this length even without silence
    pub max_utterance: Duration,
    pub barge_in: BargeInPolicy,
    /// Voiced audio needed during playback before barge-in fires
    pub barge_in_min_voiced: Duration,
}

impl Default for TurnControllerConfig {
    fn default() -> Self {
        use voice_bridge_config::constants::vad::{
            MAX_UTTERANCE_MS, MIN_UTTERANCE_MS, SILENCE_DURATION_MS,
        };

        Self {
            silence_duration: Duration::from_millis(SILENCE_DURATION_MS as u64),
            min_utterance: Duration::from_millis(MIN_UTTERANCE_MS as u64),
            max_utterance: Duration::from_millis(MAX_UTTERANCE_MS as u64),
            barge_in: BargeInPolicy::Interrupt,
            barge_in_min_voiced: Duration::from_millis(200),
        }
    }
}

impl TurnControllerConfig {
    pub fn from_settings(vad: &voice_bridge_config::VadSettings, barge_in: BargeInPolicy) -> Self {
        Self {
            silence_duration: Duration::from_millis(vad.silence_duration_ms as u64),
            min_utterance: Duration::from_millis(vad.min_utterance_ms as u64),
            max_utterance: Duration::from_millis(vad.max_utterance_ms as u64),
            barge_in,
            ..Default::default()
        }
    }
}

/// Signals from the bridge or the streaming backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnSignal {
    /// Backend detected caller speech
    CallerStarted,
    /// Backend detected the end of caller speech
    CallerFinished,
    /// First assistant audio is ready for playback
    AssistantAudio,
    /// Assistant response finished and playback drained
    AssistantDone,
    /// Current turn failed, no response will follow
    Abandon,
    /// Call ended, cancel everything
    CallEnded,
}

/// Transition emitted by the controller
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// Idle to CallerSpeaking
    CallerStarted,
    /// First quiet frame, silence timer started
    SilenceStarted,
    /// Speech resumed before the timer elapsed
    CallerResumed,
    /// Caller turn complete, utterance ready for the bridge
    TurnEnded(Utterance),
    /// Turn too short to process, back to Idle
    TurnDiscarded { voiced: Duration },
    /// Caller speech interrupted assistant playback
    BargeIn,
    AssistantStarted,
    AssistantFinished,
    /// Backend ended the caller turn (no local utterance)
    CallerFinished,
    TurnAbandoned,
    Reset,
}

struct InternalState {
    state: TurnState,
    utterance: Option<Utterance>,
    silence_since: Option<Instant>,
    barge_in_voiced: Duration,
}

impl InternalState {
    fn clear(&mut self) {
        self.utterance = None;
        self.silence_since = None;
        self.barge_in_voiced = Duration::ZERO;
    }

    fn transition(&mut self, to: TurnState) {
        if self.state != to {
            tracing::debug!(from = %self.state, to = %to, "Turn state transition");
            self.state = to;
        }
    }
}

/// Per-call turn state machine
///
/// Driven by per-frame VAD results, a silence timer checked on every frame
/// and on [`TurnController::poll`], and signals from the bridge.
pub struct TurnController {
    config: TurnControllerConfig,
    internal: Mutex<InternalState>,
}

impl TurnController {
    pub fn new(config: TurnControllerConfig) -> Self {
        Self {
            config,
            internal: Mutex::new(InternalState {
                state: TurnState::Idle,
                utterance: None,
                silence_since: None,
                barge_in_voiced: Duration::ZERO,
            }),
        }
    }

    pub fn config(&self) -> &TurnControllerConfig {
        &self.config
    }

    pub fn state(&self) -> TurnState {
        self.internal.lock().state
    }

    /// Feed one inbound frame with its VAD result, captured at `at`
    ///
    /// The silence timer runs on frame energy: the first quiet frame starts
    /// it even while the VAD hangover still reports speech.
    pub fn on_frame(
        &self,
        frame: &AudioFrame,
        vad: VadResult,
        at: Instant,
    ) -> Result<Option<TurnEvent>, PipelineError> {
        let voiced = vad.is_voiced_frame();
        let mut internal = self.internal.lock();

        let event = match internal.state {
            TurnState::Idle => {
                if voiced {
                    self.begin_utterance(&mut internal, frame, at)?;
                    Some(TurnEvent::CallerStarted)
                } else {
                    None
                }
            },

            TurnState::CallerSpeaking => {
                Self::capture(&mut internal, frame, voiced)?;
                if !voiced {
                    internal.silence_since = Some(at);
                    internal.transition(TurnState::CallerSilencePending);
                }
                if self.reached_max(&internal) {
                    Some(self.finalize(&mut internal))
                } else if !voiced {
                    Some(TurnEvent::SilenceStarted)
                } else {
                    None
                }
            },

            TurnState::CallerSilencePending => {
                Self::capture(&mut internal, frame, voiced)?;
                if voiced {
                    internal.silence_since = None;
                    internal.transition(TurnState::CallerSpeaking);
                    if self.reached_max(&internal) {
                        Some(self.finalize(&mut internal))
                    } else {
                        Some(TurnEvent::CallerResumed)
                    }
                } else if self.silence_elapsed(&internal, at) || self.reached_max(&internal) {
                    Some(self.finalize(&mut internal))
                } else {
                    None
                }
            },

            TurnState::Processing => None,

            TurnState::AssistantSpeaking => match self.config.barge_in {
                BargeInPolicy::Ignore => None,
                BargeInPolicy::Interrupt => {
                    if voiced {
                        internal.barge_in_voiced += frame.duration;
                    } else {
                        internal.barge_in_voiced = Duration::ZERO;
                    }

                    if internal.barge_in_voiced >= self.config.barge_in_min_voiced {
                        tracing::info!(
                            voiced_ms = internal.barge_in_voiced.as_millis() as u64,
                            "Caller barged in over assistant playback"
                        );
                        self.begin_utterance(&mut internal, frame, at)?;
                        Some(TurnEvent::BargeIn)
                    } else {
                        None
                    }
                },
            },
        };

        Ok(event)
    }

    /// Check the silence timer without a new frame
    pub fn poll(&self, at: Instant) -> Option<TurnEvent> {
        let mut internal = self.internal.lock();
        if internal.state == TurnState::CallerSilencePending && self.silence_elapsed(&internal, at)
        {
            Some(self.finalize(&mut internal))
        } else {
            None
        }
    }

    /// Apply a bridge or backend signal
    pub fn apply(&self, signal: TurnSignal) -> Option<TurnEvent> {
        let mut internal = self.internal.lock();
        let from = internal.state;

        match (signal, from) {
            (TurnSignal::CallEnded, _) => {
                internal.clear();
                internal.transition(TurnState::Idle);
                Some(TurnEvent::Reset)
            },

            (TurnSignal::CallerStarted, TurnState::Idle) => {
                internal.clear();
                internal.transition(TurnState::CallerSpeaking);
                Some(TurnEvent::CallerStarted)
            },
            (TurnSignal::CallerStarted, TurnState::AssistantSpeaking) => {
                internal.clear();
                internal.transition(TurnState::CallerSpeaking);
                Some(TurnEvent::BargeIn)
            },
            (TurnSignal::CallerStarted, TurnState::Processing)
            | (TurnSignal::CallerStarted, TurnState::CallerSilencePending) => {
                internal.silence_since = None;
                internal.transition(TurnState::CallerSpeaking);
                Some(TurnEvent::CallerResumed)
            },
            (TurnSignal::CallerStarted, TurnState::CallerSpeaking) => None,

            (TurnSignal::CallerFinished, state) if state.is_caller_turn() => {
                internal.clear();
                internal.transition(TurnState::Processing);
                Some(TurnEvent::CallerFinished)
            },
            (TurnSignal::CallerFinished, _) => None,

            (TurnSignal::AssistantAudio, TurnState::AssistantSpeaking) => None,
            (TurnSignal::AssistantAudio, _) => {
                internal.clear();
                internal.transition(TurnState::AssistantSpeaking);
                Some(TurnEvent::AssistantStarted)
            },

            (TurnSignal::AssistantDone, TurnState::AssistantSpeaking)
            | (TurnSignal::AssistantDone, TurnState::Processing) => {
                internal.clear();
                internal.transition(TurnState::Idle);
                Some(TurnEvent::AssistantFinished)
            },
            (TurnSignal::AssistantDone, _) => None,

            (TurnSignal::Abandon, TurnState::Processing)
            | (TurnSignal::Abandon, TurnState::AssistantSpeaking) => {
                internal.clear();
                internal.transition(TurnState::Idle);
                Some(TurnEvent::TurnAbandoned)
            },
            (TurnSignal::Abandon, _) => None,
        }
    }

    /// Return to Idle, dropping any partial utterance
    pub fn reset(&self) {
        let mut internal = self.internal.lock();
        internal.clear();
        internal.transition(TurnState::Idle);
    }

    fn begin_utterance(
        &self,
        internal: &mut InternalState,
        frame: &AudioFrame,
        at: Instant,
    ) -> Result<(), PipelineError> {
        let mut utterance = Utterance::new(frame.sample_rate, at);
        utterance.push(frame.clone(), true)?;
        internal.utterance = Some(utterance);
        internal.silence_since = None;
        internal.barge_in_voiced = Duration::ZERO;
        internal.transition(TurnState::CallerSpeaking);
        Ok(())
    }

    fn capture(
        internal: &mut InternalState,
        frame: &AudioFrame,
        voiced: bool,
    ) -> Result<(), PipelineError> {
        if let Some(utterance) = internal.utterance.as_mut() {
            utterance.push(frame.clone(), voiced)?;
        }
        Ok(())
    }

    fn silence_elapsed(&self, internal: &InternalState, at: Instant) -> bool {
        internal
            .silence_since
            .is_some_and(|since| at.saturating_duration_since(since) >= self.config.silence_duration)
    }

    fn reached_max(&self, internal: &InternalState) -> bool {
        internal
            .utterance
            .as_ref()
            .is_some_and(|u| u.duration() >= self.config.max_utterance)
    }

    fn finalize(&self, internal: &mut InternalState) -> TurnEvent {
        let utterance = internal.utterance.take();
        internal.clear();

        match utterance {
            Some(utterance) if utterance.voiced_duration() >= self.config.min_utterance => {
                tracing::debug!(
                    frames = utterance.frame_count(),
                    duration_ms = utterance.duration().as_millis() as u64,
                    voiced_ms = utterance.voiced_duration().as_millis() as u64,
                    "Caller turn ended"
                );
                internal.transition(TurnState::Processing);
                TurnEvent::TurnEnded(utterance)
            },
            other => {
                let voiced = other
                    .map(|u| u.voiced_duration())
                    .unwrap_or(Duration::ZERO);
                tracing::debug!(
                    voiced_ms = voiced.as_millis() as u64,
                    "Caller turn too short, discarded"
                );
                internal.transition(TurnState::Idle);
                TurnEvent::TurnDiscarded { voiced }
            },
        }
    }
}
