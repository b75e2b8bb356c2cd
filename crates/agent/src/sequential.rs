//! Sequential pipeline bridge
//!
//! Each caller turn runs transcribe, reason and synthesize as three
//! strictly ordered remote calls on a task of its own, so the worker keeps
//! draining inbound audio and ticking playout while they are in flight.
//! Barge-in is not supported: once issued the remote calls cannot be
//! interrupted individually, so a response always plays to completion.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use voice_bridge_config::Settings;
use voice_bridge_core::{
    AudioFrame, ConversationHistory, ConversationTurn, Error, LanguageModel, RemoteStage, Result,
    SampleRate, SpeechToText, TextToSpeech, Utterance,
};
use voice_bridge_pipeline::{
    BargeInPolicy, EnergyVad, TurnController, TurnControllerConfig, TurnEvent, TurnSignal,
    TurnState, VadConfig,
};

use crate::metrics::{record_remote_call, record_turn, TurnOutcomeLabel};
use crate::session::{shutdown_requested, WorkerContext};
use crate::{AgentError, BridgeEvent};

/// Sequential bridge configuration
#[derive(Debug, Clone)]
pub struct SequentialConfig {
    /// Rate utterances are captured and uploaded at
    pub input_rate: SampleRate,
    pub vad: VadConfig,
    pub turns: TurnControllerConfig,
    /// Deadline for each remote call
    pub remote_timeout: Duration,
    /// Keep synthesized audio on assistant turns
    pub retain_audio: bool,
}

impl Default for SequentialConfig {
    fn default() -> Self {
        Self {
            input_rate: SampleRate::Hz16000,
            vad: VadConfig::default(),
            turns: TurnControllerConfig {
                barge_in: BargeInPolicy::Ignore,
                ..Default::default()
            },
            remote_timeout: Duration::from_millis(
                voice_bridge_config::constants::timeouts::REMOTE_MS,
            ),
            retain_audio: false,
        }
    }
}

impl SequentialConfig {
    pub fn from_settings(settings: &Settings) -> std::result::Result<Self, AgentError> {
        Ok(Self {
            input_rate: SampleRate::from_hz(settings.backend.sample_rate)?,
            vad: VadConfig::from_settings(&settings.vad, settings.bridge.frame_ms),
            turns: TurnControllerConfig::from_settings(&settings.vad, BargeInPolicy::Ignore),
            remote_timeout: Duration::from_millis(settings.bridge.remote_timeout_ms),
            retain_audio: settings.history.retain_audio,
        })
    }
}

/// Result of one caller turn
#[derive(Debug)]
pub enum TurnOutcome {
    /// Reply synthesized, audio at the synthesizer's native rate
    Completed {
        transcript: String,
        reply: String,
        audio: AudioFrame,
    },
    /// No assistant audio for this turn
    Abandoned {
        transcript: Option<String>,
        reason: String,
    },
}

impl TurnOutcome {
    fn failed(stage: RemoteStage, error: Error, transcript: Option<String>) -> Self {
        tracing::warn!(stage = %stage, error = %error, "Turn abandoned");
        TurnOutcome::Abandoned {
            transcript,
            reason: error.to_string(),
        }
    }
}

/// Turn task, aborted when dropped
struct TurnTask(JoinHandle<TurnOutcome>);

impl Drop for TurnTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn join_turn(task: &mut Option<TurnTask>) -> std::result::Result<TurnOutcome, JoinError> {
    match task.as_mut() {
        Some(task) => (&mut task.0).await,
        None => std::future::pending().await,
    }
}

/// Transcribe, reason, synthesize
#[derive(Clone)]
pub struct SequentialBridge {
    stt: Arc<dyn SpeechToText>,
    llm: Arc<dyn LanguageModel>,
    tts: Arc<dyn TextToSpeech>,
    config: SequentialConfig,
}

impl SequentialBridge {
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        llm: Arc<dyn LanguageModel>,
        tts: Arc<dyn TextToSpeech>,
        config: SequentialConfig,
    ) -> Self {
        Self {
            stt,
            llm,
            tts,
            config,
        }
    }

    pub fn config(&self) -> &SequentialConfig {
        &self.config
    }

    /// Native rate of synthesized replies
    pub fn output_rate(&self) -> SampleRate {
        self.tts.sample_rate()
    }

    /// Run one caller turn through the three remote calls
    ///
    /// The caller turn is appended once transcribed, the assistant turn
    /// once its audio exists. An empty transcript or any failure abandons
    /// the turn before the next call is issued.
    pub async fn run_turn(
        &self,
        utterance: Utterance,
        history: &Mutex<ConversationHistory>,
    ) -> TurnOutcome {
        let started = Instant::now();
        let audio = utterance.into_frame();

        let transcript = match self
            .remote(RemoteStage::Transcribe, self.stt.transcribe(&audio))
            .await
        {
            Ok(text) => text.trim().to_string(),
            Err(e) => return TurnOutcome::failed(RemoteStage::Transcribe, e, None),
        };
        if transcript.is_empty() {
            tracing::info!(audio_ms = audio.duration.as_millis() as u64, "Empty transcript, turn abandoned");
            return TurnOutcome::Abandoned {
                transcript: None,
                reason: "empty transcript".to_string(),
            };
        }

        let context = {
            let mut history = history.lock();
            history.push(ConversationTurn::caller(transcript.clone()));
            history.snapshot()
        };

        let reply = match self
            .remote(RemoteStage::Reason, self.llm.respond(&context))
            .await
        {
            Ok(reply) => reply,
            Err(e) => return TurnOutcome::failed(RemoteStage::Reason, e, Some(transcript)),
        };

        let speech = match self
            .remote(RemoteStage::Synthesize, self.tts.synthesize(&reply))
            .await
        {
            Ok(speech) => speech,
            Err(e) => return TurnOutcome::failed(RemoteStage::Synthesize, e, Some(transcript)),
        };

        let mut turn = ConversationTurn::assistant(reply.clone());
        if self.config.retain_audio {
            turn = turn.with_audio(speech.clone());
        }
        history.lock().push(turn);

        tracing::info!(
            transcript_chars = transcript.len(),
            reply_chars = reply.len(),
            speech_ms = speech.duration.as_millis() as u64,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Turn complete"
        );

        TurnOutcome::Completed {
            transcript,
            reply,
            audio: speech,
        }
    }

    /// Run a remote call under the configured deadline
    async fn remote<T>(&self, stage: RemoteStage, call: impl Future<Output = Result<T>>) -> Result<T> {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.config.remote_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                stage,
                after_ms: self.config.remote_timeout.as_millis() as u64,
            }),
        };
        record_remote_call(stage, started.elapsed());
        result
    }

    /// Worker loop for one call
    pub(crate) async fn run(self, mut ctx: WorkerContext) {
        let vad = EnergyVad::new(self.config.vad.clone());
        let controller = TurnController::new(self.config.turns.clone());
        let inbound = ctx.inbound.clone();
        let mut shutdown = ctx.shutdown.clone();
        let tick = ctx.frame_duration();
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight: Option<TurnTask> = None;

        tracing::debug!(
            stt = self.stt.model_name(),
            llm = self.llm.model_name(),
            tts = self.tts.model_name(),
            "Sequential bridge running"
        );

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,

                frame = inbound.recv(tick) => {
                    if let Some(frame) = frame {
                        self.on_frame(&ctx, &vad, &controller, frame, &mut in_flight);
                    }
                }

                joined = join_turn(&mut in_flight) => {
                    in_flight = None;
                    let outcome = joined.unwrap_or_else(|e| TurnOutcome::Abandoned {
                        transcript: None,
                        reason: format!("turn task failed: {}", e),
                    });
                    self.on_outcome(&mut ctx, &controller, outcome);
                }

                _ = ticker.tick() => {
                    if let Some(event) = controller.poll(std::time::Instant::now()) {
                        self.on_turn_event(&ctx, event, &mut in_flight);
                    }
                    ctx.playout.pump();
                    if controller.state() == TurnState::AssistantSpeaking && ctx.playout.is_drained() {
                        controller.apply(TurnSignal::AssistantDone);
                    }
                    ctx.sync_state(&controller);
                }
            }
        }

        if in_flight.take().is_some() {
            tracing::info!("In-flight turn cancelled");
        }
        ctx.playout.cancel();
        controller.apply(TurnSignal::CallEnded);
        ctx.sync_state(&controller);
        tracing::debug!("Sequential bridge stopped");
    }

    fn on_frame(
        &self,
        ctx: &WorkerContext,
        vad: &EnergyVad,
        controller: &TurnController,
        frame: AudioFrame,
        in_flight: &mut Option<TurnTask>,
    ) {
        let decision = vad.process(&frame);
        match controller.on_frame(&frame, decision, frame.timestamp) {
            Ok(Some(event)) => self.on_turn_event(ctx, event, in_flight),
            Ok(None) => {},
            Err(e) => tracing::warn!(error = %e, "Inbound frame rejected"),
        }
        ctx.sync_state(controller);
    }

    fn on_turn_event(
        &self,
        ctx: &WorkerContext,
        event: TurnEvent,
        in_flight: &mut Option<TurnTask>,
    ) {
        match event {
            TurnEvent::TurnEnded(utterance) => {
                tracing::info!(
                    duration_ms = utterance.duration().as_millis() as u64,
                    voiced_ms = utterance.voiced_duration().as_millis() as u64,
                    "Caller turn ended, processing"
                );
                let bridge = self.clone();
                let history = ctx.history.clone();
                let task = tokio::spawn(
                    async move { bridge.run_turn(utterance, &history).await }.in_current_span(),
                );
                *in_flight = Some(TurnTask(task));
            },
            TurnEvent::TurnDiscarded { voiced } => {
                tracing::debug!(voiced_ms = voiced.as_millis() as u64, "Short utterance discarded");
                record_turn(TurnOutcomeLabel::Discarded);
            },
            _ => {},
        }
    }

    fn on_outcome(&self, ctx: &mut WorkerContext, controller: &TurnController, outcome: TurnOutcome) {
        match outcome {
            TurnOutcome::Completed {
                transcript,
                reply,
                audio,
            } => {
                ctx.emit(BridgeEvent::CallerTranscript { text: transcript });
                ctx.emit(BridgeEvent::AssistantTranscript { text: reply });

                let queued = ctx
                    .playout
                    .enqueue(&audio)
                    .and_then(|_| ctx.playout.finish());
                match queued {
                    Ok(()) => {
                        controller.apply(TurnSignal::AssistantAudio);
                        ctx.playout.pump();
                        ctx.emit(BridgeEvent::TurnCompleted);
                        record_turn(TurnOutcomeLabel::Completed);
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "Synthesized audio rejected");
                        ctx.playout.cancel();
                        controller.apply(TurnSignal::Abandon);
                        ctx.emit(BridgeEvent::TurnAbandoned {
                            reason: e.to_string(),
                        });
                        record_turn(TurnOutcomeLabel::Abandoned);
                    },
                }
            },
            TurnOutcome::Abandoned { transcript, reason } => {
                if let Some(text) = transcript {
                    ctx.emit(BridgeEvent::CallerTranscript { text });
                }
                controller.apply(TurnSignal::Abandon);
                ctx.emit(BridgeEvent::TurnAbandoned { reason });
                record_turn(TurnOutcomeLabel::Abandoned);
            },
        }
        ctx.sync_state(controller);
    }
}
