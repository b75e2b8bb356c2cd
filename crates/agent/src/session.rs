//! Per-call bridge session
//!
//! ```text
//!  adapter thread                         worker task
//!  ──────────────                         ───────────
//!  on_audio_frame ─▶ uplink resampler ─▶ inbound queue ─▶ VAD / turns / bridge
//!        │                                                      │
//!        ◀──────────── outbound queue ◀──── playout ◀───────────┘
//! ```
//!
//! The adapter thread only resamples and touches the two queues. Turn state,
//! history and any streaming connection are owned by the worker; the
//! session reads turn state back through a watch channel.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use voice_bridge_config::Settings;
use voice_bridge_core::{AudioFrame, ConversationHistory, ConversationTurn, SampleRate};
use voice_bridge_pipeline::{
    Direction, FrameQueue, PushOutcome, StreamResampler, TurnController, TurnState,
};

use crate::{AgentError, Bridge, BridgeEvent, CallAdapter, CallContext, Playout};

/// Session sizing
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub inbound_queue_frames: usize,
    pub outbound_queue_frames: usize,
    /// Sliding window of retained turns
    pub history_max_turns: usize,
    /// Broadcast buffer for bridge events
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        use voice_bridge_config::constants::{llm, queues};

        Self {
            inbound_queue_frames: queues::INBOUND_FRAMES,
            outbound_queue_frames: queues::OUTBOUND_FRAMES,
            history_max_turns: llm::HISTORY_MAX_TURNS,
            event_capacity: 100,
        }
    }
}

impl SessionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            inbound_queue_frames: settings.bridge.inbound_queue_frames,
            outbound_queue_frames: settings.bridge.outbound_queue_frames,
            history_max_turns: settings.history.max_turns,
            ..Default::default()
        }
    }
}

/// Everything the worker task owns for one call
pub(crate) struct WorkerContext {
    pub frame_ms: u32,
    pub inbound: Arc<FrameQueue>,
    pub playout: Playout,
    pub history: Arc<Mutex<ConversationHistory>>,
    pub events: broadcast::Sender<BridgeEvent>,
    pub state: Arc<watch::Sender<TurnState>>,
    pub shutdown: watch::Receiver<bool>,
}

impl WorkerContext {
    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_ms as u64)
    }

    pub fn emit(&self, event: BridgeEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Publish the controller's state, emitting `StateChanged` on change
    pub fn sync_state(&self, controller: &TurnController) -> TurnState {
        let to = controller.state();
        let from = self.state.send_replace(to);
        if from != to {
            self.emit(BridgeEvent::StateChanged { from, to });
        }
        to
    }

    pub fn record_turn(&self, turn: ConversationTurn) {
        self.history.lock().push(turn);
    }
}

/// Resolves once shutdown is requested or the session is gone
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// One call's bridge, from media start to call end
///
/// Created by [`BridgeSession::start`] once call media is active. Every
/// resource is released by [`BridgeSession::stop`], which also runs on drop.
pub struct BridgeSession {
    context: CallContext,
    bridge: &'static str,
    adapter: Arc<dyn CallAdapter>,
    /// Call rate to bridge input rate, adapter thread only
    uplink: Mutex<StreamResampler>,
    inbound: Arc<FrameQueue>,
    outbound: Arc<FrameQueue>,
    history: Arc<Mutex<ConversationHistory>>,
    events: broadcast::Sender<BridgeEvent>,
    state: Arc<watch::Sender<TurnState>>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl BridgeSession {
    /// Attach `bridge` to a call and spawn its worker on the current runtime
    pub fn start(
        context: CallContext,
        adapter: Arc<dyn CallAdapter>,
        bridge: Bridge,
        config: SessionConfig,
    ) -> Result<Self, AgentError> {
        let runtime = Handle::try_current().map_err(|_| AgentError::NoRuntime)?;

        let uplink = StreamResampler::new(context.sample_rate, bridge.input_rate(), context.frame_ms)?;
        let inbound = Arc::new(FrameQueue::new(Direction::Inbound, config.inbound_queue_frames));
        let outbound = Arc::new(FrameQueue::new(Direction::Outbound, config.outbound_queue_frames));
        let playout = Playout::new(
            bridge.output_rate(),
            context.sample_rate,
            context.frame_ms,
            outbound.clone(),
        )?;

        let history = Arc::new(Mutex::new(ConversationHistory::new(config.history_max_turns)));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (state, _) = watch::channel(TurnState::Idle);
        let state = Arc::new(state);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let worker_context = WorkerContext {
            frame_ms: context.frame_ms,
            inbound: inbound.clone(),
            playout,
            history: history.clone(),
            events: events.clone(),
            state: state.clone(),
            shutdown: shutdown_rx,
        };

        let name = bridge.name();
        tracing::info!(
            call_id = %context.call_id,
            bridge = name,
            call_rate = context.sample_rate.as_u32(),
            input_rate = bridge.input_rate().as_u32(),
            output_rate = bridge.output_rate().as_u32(),
            "Bridge session started"
        );

        let span = tracing::info_span!("bridge", call_id = %context.call_id, bridge = name);
        let worker = runtime.spawn(bridge.run(worker_context).instrument(span));

        Ok(Self {
            context,
            bridge: name,
            adapter,
            uplink: Mutex::new(uplink),
            inbound,
            outbound,
            history,
            events,
            state,
            shutdown,
            worker: Mutex::new(Some(worker)),
            stopped: AtomicBool::new(false),
        })
    }

    /// Inbound media callback, called on the adapter's real-time thread
    ///
    /// Never blocks: hands at most one outbound frame to the adapter, then
    /// resamples the inbound frame and pushes it to the worker. A full
    /// inbound queue drops its oldest frame and reports an overrun.
    pub fn on_audio_frame(&self, frame: AudioFrame) -> Result<(), AgentError> {
        if self.stopped.load(Ordering::Acquire) {
            return Ok(());
        }

        if let Some(outbound) = self.outbound.try_pop() {
            self.adapter.send_audio_frame(outbound);
        }

        frame.ensure_rate(self.context.sample_rate)?;
        let frames = self.uplink.lock().process(&frame)?;
        for frame in frames {
            if let PushOutcome::Overrun { dropped } = self.inbound.push(frame) {
                let _ = self.events.send(BridgeEvent::Overrun {
                    direction: Direction::Inbound,
                    dropped,
                });
            }
        }
        Ok(())
    }

    /// Call-end event from the adapter
    pub fn on_call_ended(&self) {
        tracing::info!(call_id = %self.context.call_id, "Call ended");
        self.stop();
    }

    /// Detach from the call and release everything. Idempotent.
    ///
    /// Aborts the worker, which cancels any in-flight remote request and
    /// closes the streaming connection, then empties both queues.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let _ = self.shutdown.send(true);
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }

        let dropped_in = self.inbound.flush();
        let dropped_out = self.outbound.flush();
        if let Err(e) = self.uplink.lock().reset() {
            tracing::warn!(call_id = %self.context.call_id, error = %e, "Uplink reset failed");
        }

        let from = self.state.send_replace(TurnState::Idle);
        if from != TurnState::Idle {
            let _ = self.events.send(BridgeEvent::StateChanged {
                from,
                to: TurnState::Idle,
            });
        }

        tracing::info!(
            call_id = %self.context.call_id,
            bridge = self.bridge,
            dropped_in,
            dropped_out,
            inbound_overruns = self.inbound.overruns(),
            turns = self.history.lock().len(),
            "Bridge session stopped"
        );
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn turn_state(&self) -> TurnState {
        *self.state.borrow()
    }

    /// Receiver that observes every turn state change
    pub fn watch_state(&self) -> watch::Receiver<TurnState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Copy of the conversation so far, oldest first
    pub fn history(&self) -> Vec<ConversationTurn> {
        self.history.lock().snapshot()
    }

    pub fn call_id(&self) -> &str {
        &self.context.call_id
    }

    pub fn bridge_name(&self) -> &'static str {
        self.bridge
    }

    pub fn call_rate(&self) -> SampleRate {
        self.context.sample_rate
    }

    /// Frames waiting for the adapter
    pub fn outbound_depth(&self) -> usize {
        self.outbound.len()
    }

    pub fn inbound_overruns(&self) -> u64 {
        self.inbound.overruns()
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for BridgeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSession")
            .field("call_id", &self.context.call_id)
            .field("bridge", &self.bridge)
            .field("state", &self.turn_state())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
