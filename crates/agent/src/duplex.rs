//! Full-duplex streaming bridge
//!
//! One persistent session per call. Caller audio is forwarded frame by
//! frame as it arrives; the backend runs its own turn detection and its
//! speech-start / speech-stop events drive the turn controller. Barge-in
//! cancels the response in flight, flushes playout and discards late audio
//! until the backend starts a new response.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use voice_bridge_config::constants::queues::OVERRUN_LOG_EVERY;
use voice_bridge_config::Settings;
use voice_bridge_core::{
    AudioFrame, ClientEvent, ConversationTurn, Error, RealtimeConnector, RealtimeLink,
    RealtimeSessionConfig, RemoteStage, Result, SampleRate, ServerEvent, TurnRole,
};
use voice_bridge_pipeline::{
    BargeInPolicy, TurnController, TurnControllerConfig, TurnEvent, TurnSignal, TurnState,
};

use crate::metrics::{
    record_barge_in, record_reconnect, record_stream_drop, record_turn, TurnOutcomeLabel,
};
use crate::session::{shutdown_requested, WorkerContext};
use crate::{AgentError, BridgeEvent};

/// Duplex bridge configuration
#[derive(Debug, Clone)]
pub struct DuplexConfig {
    pub session: RealtimeSessionConfig,
    /// Ask for a response as soon as the backend ends a caller turn
    pub auto_response: bool,
    pub connect_timeout: Duration,
    /// Audio is buffered until the session reports ready, at most this long
    pub ready_timeout: Duration,
    pub reconnect_attempts: u32,
    /// First reopen delay, doubled per attempt
    pub reconnect_backoff: Duration,
    /// A response with no audio for this long is treated as finished
    pub response_idle: Duration,
}

impl Default for DuplexConfig {
    fn default() -> Self {
        use voice_bridge_config::constants::{endpoints, llm, realtime, retry, timeouts, vad};

        Self {
            session: RealtimeSessionConfig {
                model: endpoints::REALTIME_MODEL.to_string(),
                voice: endpoints::VOICE.to_string(),
                instructions: llm::SYSTEM_PROMPT.to_string(),
                sample_rate: SampleRate::Hz24000,
                vad_threshold: realtime::VAD_THRESHOLD,
                prefix_padding_ms: realtime::PREFIX_PADDING_MS,
                silence_duration_ms: vad::SILENCE_DURATION_MS,
            },
            auto_response: true,
            connect_timeout: Duration::from_millis(timeouts::CONNECT_MS),
            ready_timeout: Duration::from_millis(timeouts::REALTIME_READY_MS),
            reconnect_attempts: retry::RECONNECT_ATTEMPTS,
            reconnect_backoff: Duration::from_millis(retry::RECONNECT_BACKOFF_MS),
            response_idle: Duration::from_millis(timeouts::RESPONSE_IDLE_MS),
        }
    }
}

impl DuplexConfig {
    pub fn from_settings(settings: &Settings) -> std::result::Result<Self, AgentError> {
        let rt = &settings.realtime;
        Ok(Self {
            session: RealtimeSessionConfig {
                model: rt.model.clone(),
                voice: rt.voice.clone(),
                instructions: rt.instructions.clone(),
                sample_rate: SampleRate::from_hz(rt.sample_rate)?,
                vad_threshold: rt.vad_threshold,
                prefix_padding_ms: rt.prefix_padding_ms,
                silence_duration_ms: rt.silence_duration_ms,
            },
            auto_response: rt.auto_response,
            connect_timeout: Duration::from_millis(settings.bridge.connect_timeout_ms),
            ready_timeout: Duration::from_millis(rt.ready_timeout_ms),
            reconnect_attempts: rt.reconnect_attempts,
            reconnect_backoff: Duration::from_millis(rt.reconnect_backoff_ms),
            response_idle: Duration::from_millis(rt.response_idle_ms),
        })
    }
}

/// Per-connection view of the backend conversation
struct StreamState {
    ready: bool,
    opened_at: Instant,
    /// Caller audio held until a session is open and ready
    pre_ready: VecDeque<AudioFrame>,
    pre_ready_cap: usize,
    /// A response is being generated
    responding: bool,
    /// Audio from a cancelled response is still arriving
    discarding: bool,
    last_delta: Option<Instant>,
    /// Messages lost to a full send buffer
    dropped: u64,
}

impl StreamState {
    fn new(pre_ready_cap: usize) -> Self {
        Self {
            ready: false,
            opened_at: Instant::now(),
            pre_ready: VecDeque::new(),
            pre_ready_cap: pre_ready_cap.max(1),
            responding: false,
            discarding: false,
            last_delta: None,
            dropped: 0,
        }
    }

    /// Session opened; starts the ready timer
    fn opened(&mut self) {
        self.opened_at = Instant::now();
    }

    fn hold(&mut self, frame: AudioFrame) {
        if self.pre_ready.len() >= self.pre_ready_cap {
            self.pre_ready.pop_front();
        }
        self.pre_ready.push_back(frame);
    }

    fn mark_ready(&mut self, link: &RealtimeLink) {
        self.ready = true;
        let held = std::mem::take(&mut self.pre_ready);
        for frame in held {
            self.send(link, ClientEvent::AppendAudio(frame));
        }
    }

    /// Non-blocking send. Drops are counted; a closed link surfaces as a
    /// closed event channel.
    fn send(&mut self, link: &RealtimeLink, event: ClientEvent) {
        match try_send(link, event) {
            Ok(()) => {},
            Err(Error::QueueOverrun { dropped }) => {
                self.dropped += dropped;
                record_stream_drop();
                if self.dropped == 1 || self.dropped % OVERRUN_LOG_EVERY == 0 {
                    tracing::warn!(dropped = self.dropped, "Streaming send buffer full, message dropped");
                }
            },
            Err(e) => tracing::debug!(error = %e, "Streaming send skipped"),
        }
    }
}

fn try_send(link: &RealtimeLink, event: ClientEvent) -> Result<()> {
    link.commands.try_send(event).map_err(|e| match e {
        TrySendError::Full(_) => Error::QueueOverrun { dropped: 1 },
        TrySendError::Closed(_) => Error::ChannelClosed,
    })
}

/// Session being opened, with the reopen attempt it came from (0 for the
/// first connect)
type Opening<'a> = Pin<Box<dyn Future<Output = Result<(RealtimeLink, u32)>> + Send + 'a>>;

async fn next_opened(opening: &mut Option<Opening<'_>>) -> Result<(RealtimeLink, u32)> {
    match opening.as_mut() {
        Some(opening) => opening.await,
        None => std::future::pending().await,
    }
}

async fn next_event(link: &mut Option<RealtimeLink>) -> Option<ServerEvent> {
    match link.as_mut() {
        Some(link) => link.events.recv().await,
        None => std::future::pending().await,
    }
}

/// Persistent streaming session bridge
pub struct DuplexBridge {
    connector: Arc<dyn RealtimeConnector>,
    config: DuplexConfig,
}

impl DuplexBridge {
    pub fn new(connector: Arc<dyn RealtimeConnector>, config: DuplexConfig) -> Self {
        Self { connector, config }
    }

    pub fn config(&self) -> &DuplexConfig {
        &self.config
    }

    /// Open a session under the connect deadline
    async fn connect(&self) -> Result<RealtimeLink> {
        let after = self.config.connect_timeout;
        let link = match tokio::time::timeout(after, self.connector.connect(&self.config.session)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Timeout {
                    stage: RemoteStage::Stream,
                    after_ms: after.as_millis() as u64,
                })
            },
        };
        tracing::info!(
            backend = self.connector.name(),
            model = %self.config.session.model,
            rate = self.config.session.sample_rate.as_u32(),
            "Streaming session opened"
        );
        Ok(link)
    }

    fn open(&self) -> Opening<'_> {
        Box::pin(async move { self.connect().await.map(|link| (link, 0)) })
    }

    /// Reopen after a loss with doubling backoff; the last error when every
    /// attempt failed
    fn reopen(&self) -> Opening<'_> {
        Box::pin(async move {
            let mut backoff = self.config.reconnect_backoff;
            let mut last = Error::SessionLost("no reconnect attempts configured".to_string());
            for attempt in 1..=self.config.reconnect_attempts {
                tokio::time::sleep(backoff).await;
                match self.connect().await {
                    Ok(link) => {
                        record_reconnect(true);
                        return Ok((link, attempt));
                    },
                    Err(e) => {
                        record_reconnect(false);
                        tracing::warn!(attempt, error = %e, "Streaming session reopen failed");
                        last = e;
                    },
                }
                backoff = backoff.saturating_mul(2);
            }
            Err(last)
        })
    }

    fn pre_ready_cap(&self, frame: Duration) -> usize {
        (self.config.ready_timeout.as_millis() / frame.as_millis().max(1)) as usize
    }

    /// Worker loop for one call
    ///
    /// Connecting and reopening run alongside inbound draining, so caller
    /// audio is held in the pre-ready buffer instead of overrunning the
    /// inbound queue while no session is usable.
    pub(crate) async fn run(self, mut ctx: WorkerContext) {
        let controller = TurnController::new(TurnControllerConfig {
            barge_in: BargeInPolicy::Interrupt,
            ..Default::default()
        });
        let inbound = ctx.inbound.clone();
        let mut shutdown = ctx.shutdown.clone();
        let tick = ctx.frame_duration();
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut link: Option<RealtimeLink> = None;
        let mut stream = StreamState::new(self.pre_ready_cap(tick));
        let mut opening = Some(self.open());
        let mut reopening = false;

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,

                frame = inbound.recv(tick) => {
                    if let Some(frame) = frame {
                        match link.as_ref() {
                            Some(open) if stream.ready => {
                                stream.send(open, ClientEvent::AppendAudio(frame));
                            },
                            _ => stream.hold(frame),
                        }
                    }
                }

                opened = next_opened(&mut opening) => {
                    opening = None;
                    match opened {
                        Ok((open, attempt)) => {
                            if attempt > 0 {
                                tracing::info!(attempt, "Streaming session restored");
                                ctx.emit(BridgeEvent::SessionRestored { attempt });
                            }
                            stream.opened();
                            link = Some(open);
                        },
                        Err(e) if !reopening => {
                            self.on_lost(&mut ctx, &controller, &e.to_string());
                            reopening = true;
                            opening = Some(self.reopen());
                        },
                        Err(e) => {
                            tracing::warn!(error = %e, "Streaming session could not be reopened");
                            self.degrade(&mut ctx, &controller, &mut shutdown).await;
                            return;
                        },
                    }
                }

                event = next_event(&mut link) => match event {
                    Some(event) => {
                        if let Some(open) = link.as_ref() {
                            self.on_event(&mut ctx, &controller, open, &mut stream, event);
                        }
                    },
                    None => {
                        link = None;
                        self.on_lost(&mut ctx, &controller, "connection closed");
                        stream = StreamState::new(self.pre_ready_cap(tick));
                        reopening = true;
                        opening = Some(self.reopen());
                    },
                },

                _ = ticker.tick() => self.on_tick(&mut ctx, &controller, link.as_ref(), &mut stream),
            }
        }

        drop(opening);
        drop(link);
        ctx.playout.cancel();
        controller.apply(TurnSignal::CallEnded);
        ctx.sync_state(&controller);
        tracing::debug!(dropped = stream.dropped, "Duplex bridge stopped");
    }

    fn on_event(
        &self,
        ctx: &mut WorkerContext,
        controller: &TurnController,
        link: &RealtimeLink,
        stream: &mut StreamState,
        event: ServerEvent,
    ) {
        match event {
            ServerEvent::Ready => {
                if !stream.ready {
                    tracing::info!(buffered = stream.pre_ready.len(), "Streaming session ready");
                    stream.mark_ready(link);
                }
            },

            ServerEvent::SpeechStarted => {
                let barge_in = matches!(
                    controller.apply(TurnSignal::CallerStarted),
                    Some(TurnEvent::BargeIn)
                );
                if barge_in || stream.responding {
                    self.interrupt(ctx, link, stream, barge_in);
                }
            },

            ServerEvent::SpeechStopped => {
                controller.apply(TurnSignal::CallerFinished);
                if self.config.auto_response && !stream.responding {
                    stream.send(link, ClientEvent::CreateResponse);
                }
            },

            ServerEvent::ResponseStarted => {
                stream.responding = true;
                stream.discarding = false;
            },

            ServerEvent::AudioDelta(frame) => {
                if stream.discarding {
                    tracing::trace!(sequence = frame.sequence, "Dropping audio of cancelled response");
                } else if let Err(e) = ctx.playout.enqueue(&frame) {
                    tracing::warn!(error = %e, "Streaming audio rejected");
                } else {
                    stream.last_delta = Some(Instant::now());
                    controller.apply(TurnSignal::AssistantAudio);
                    ctx.playout.pump();
                }
            },

            ServerEvent::Transcript {
                role,
                text,
                is_final,
            } => {
                let text = text.trim();
                if is_final && !text.is_empty() {
                    ctx.record_turn(ConversationTurn::new(role, Some(text.to_string())));
                    let text = text.to_string();
                    ctx.emit(match role {
                        TurnRole::Caller => BridgeEvent::CallerTranscript { text },
                        TurnRole::Assistant => BridgeEvent::AssistantTranscript { text },
                    });
                }
            },

            ServerEvent::ResponseDone => {
                stream.responding = false;
                if !stream.discarding {
                    self.finish_response(ctx, stream);
                    ctx.emit(BridgeEvent::TurnCompleted);
                    record_turn(TurnOutcomeLabel::Completed);
                    if controller.state() == TurnState::Processing {
                        // response carried no audio
                        controller.apply(TurnSignal::AssistantDone);
                    }
                }
            },

            ServerEvent::Error { message } => {
                tracing::warn!(detail = %message, "Streaming backend error");
            },
        }
        ctx.sync_state(controller);
    }

    fn on_tick(
        &self,
        ctx: &mut WorkerContext,
        controller: &TurnController,
        link: Option<&RealtimeLink>,
        stream: &mut StreamState,
    ) {
        if let Some(link) = link {
            if !stream.ready && stream.opened_at.elapsed() >= self.config.ready_timeout {
                tracing::warn!(
                    timeout_ms = self.config.ready_timeout.as_millis() as u64,
                    "Streaming session not ready, streaming anyway"
                );
                stream.mark_ready(link);
            }
        }

        let idle = stream
            .last_delta
            .is_some_and(|at| at.elapsed() >= self.config.response_idle);
        if idle && ctx.playout.is_streaming() && !stream.discarding {
            tracing::debug!("No audio within the idle window, response treated as finished");
            self.finish_response(ctx, stream);
        }

        ctx.playout.pump();
        if controller.state() == TurnState::AssistantSpeaking && ctx.playout.is_drained() {
            controller.apply(TurnSignal::AssistantDone);
        }
        ctx.sync_state(controller);
    }

    fn finish_response(&self, ctx: &mut WorkerContext, stream: &mut StreamState) {
        stream.last_delta = None;
        if let Err(e) = ctx.playout.finish() {
            tracing::warn!(error = %e, "Playout flush failed");
        }
        ctx.playout.pump();
    }

    /// Stop playback and cancel the response in flight
    fn interrupt(
        &self,
        ctx: &mut WorkerContext,
        link: &RealtimeLink,
        stream: &mut StreamState,
        barge_in: bool,
    ) {
        let discarded = ctx.playout.cancel();
        if stream.responding {
            stream.send(link, ClientEvent::CancelResponse);
        }
        stream.responding = false;
        stream.discarding = true;
        stream.last_delta = None;

        if barge_in {
            ctx.emit(BridgeEvent::BargeIn);
            record_barge_in();
        }
        record_turn(TurnOutcomeLabel::Abandoned);
        tracing::info!(discarded, barge_in, "Assistant response interrupted");
    }

    fn on_lost(&self, ctx: &mut WorkerContext, controller: &TurnController, reason: &str) {
        let error = Error::SessionLost(reason.to_string());
        tracing::warn!(error = %error, attempts = self.config.reconnect_attempts, "Reopening streaming session");
        ctx.emit(BridgeEvent::SessionLost {
            reason: reason.to_string(),
        });
        ctx.playout.cancel();
        controller.reset();
        ctx.sync_state(controller);
    }

    /// Silent until the call ends: Idle, inbound drained and discarded
    async fn degrade(
        &self,
        ctx: &mut WorkerContext,
        controller: &TurnController,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        tracing::error!("Streaming session unavailable, bridge degraded until call end");
        ctx.playout.cancel();
        controller.reset();
        ctx.sync_state(controller);
        ctx.emit(BridgeEvent::Degraded);

        let inbound = ctx.inbound.clone();
        let mut discarded = 0u64;
        loop {
            tokio::select! {
                _ = shutdown_requested(shutdown) => break,
                frame = inbound.recv(Duration::from_secs(1)) => {
                    if frame.is_some() {
                        discarded += 1;
                    }
                }
            }
        }
        tracing::debug!(discarded, "Degraded bridge stopped");
    }
}
