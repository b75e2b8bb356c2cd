//! End-to-end bridge session tests against in-process backends

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};

use voice_bridge_agent::{
    AgentError, Bridge, BridgeEvent, BridgeSession, CallAdapter, CallContext, DuplexBridge,
    DuplexConfig, SequentialBridge, SequentialConfig, SessionConfig,
};
use voice_bridge_core::{
    AudioFrame, ClientEvent, ConversationTurn, Error, LanguageModel, RealtimeConnector,
    RealtimeLink, RealtimeSessionConfig, RemoteStage, Result, SampleRate, ServerEvent,
    SpeechToText, TextToSpeech, TurnRole,
};
use voice_bridge_pipeline::{BargeInPolicy, TurnControllerConfig, TurnState, VadConfig};

const CALL_RATE: SampleRate = SampleRate::Hz8000;
const FRAME_MS: u32 = 20;

// Adapter side

#[derive(Default)]
struct RecordingAdapter {
    frames: Mutex<Vec<AudioFrame>>,
}

impl CallAdapter for RecordingAdapter {
    fn send_audio_frame(&self, frame: AudioFrame) {
        self.frames.lock().push(frame);
    }
}

// Sequential backends

struct FixedStt(&'static str);

#[async_trait]
impl SpeechToText for FixedStt {
    async fn transcribe(&self, _audio: &AudioFrame) -> Result<String> {
        Ok(self.0.to_string())
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct ScriptedLlm {
    calls: AtomicUsize,
    /// Never answers, flags the dropped request instead
    hang: Option<Arc<AtomicBool>>,
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn respond(&self, history: &[ConversationTurn]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(cancelled) = &self.hang {
            let _guard = SetOnDrop(cancelled.clone());
            tokio::time::sleep(Duration::from_secs(60)).await;
            return Err(Error::remote(RemoteStage::Reason, "unreachable"));
        }
        assert_eq!(history.last().map(|t| t.role), Some(TurnRole::Caller));
        Ok("Hi there".to_string())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[derive(Default)]
struct ToneTts {
    calls: AtomicUsize,
}

#[async_trait]
impl TextToSpeech for ToneTts {
    async fn synthesize(&self, _text: &str) -> Result<AudioFrame> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // 400ms at 24kHz
        Ok(tone(9600, SampleRate::Hz24000, 0, Instant::now()))
    }

    fn sample_rate(&self) -> SampleRate {
        SampleRate::Hz24000
    }

    fn model_name(&self) -> &str {
        "tone"
    }
}

// Duplex backend

struct ScriptedConnector {
    links: Mutex<VecDeque<RealtimeLink>>,
    connects: AtomicUsize,
}

type BackendEnds = (mpsc::Receiver<ClientEvent>, mpsc::Sender<ServerEvent>);

impl ScriptedConnector {
    fn with_links(count: usize) -> (Arc<Self>, Vec<BackendEnds>) {
        let mut links = VecDeque::new();
        let mut ends = Vec::new();
        for _ in 0..count {
            let (link, commands, events) = RealtimeLink::pair(256);
            links.push_back(link);
            ends.push((commands, events));
        }
        let connector = Arc::new(Self {
            links: Mutex::new(links),
            connects: AtomicUsize::new(0),
        });
        (connector, ends)
    }
}

#[async_trait]
impl RealtimeConnector for ScriptedConnector {
    async fn connect(&self, _config: &RealtimeSessionConfig) -> Result<RealtimeLink> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.links
            .lock()
            .pop_front()
            .ok_or_else(|| Error::remote(RemoteStage::Stream, "connection refused"))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Opens sessions only after a fixed delay
struct SlowConnector {
    inner: Arc<ScriptedConnector>,
    delay: Duration,
}

#[async_trait]
impl RealtimeConnector for SlowConnector {
    async fn connect(&self, config: &RealtimeSessionConfig) -> Result<RealtimeLink> {
        tokio::time::sleep(self.delay).await;
        self.inner.connect(config).await
    }

    fn name(&self) -> &str {
        "slow"
    }
}

// Helpers

fn tone(len: usize, rate: SampleRate, sequence: u64, at: Instant) -> AudioFrame {
    let samples = (0..len)
        .map(|n| {
            let t = n as f32 / rate.as_u32() as f32;
            (8000.0 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()) as i16
        })
        .collect();
    AudioFrame::with_timestamp(samples, rate, sequence, at)
}

fn call_frame(voiced: bool, sequence: u64, base: Instant) -> AudioFrame {
    let at = base + Duration::from_millis(sequence * FRAME_MS as u64);
    let len = CALL_RATE.samples_per_frame(FRAME_MS);
    if voiced {
        tone(len, CALL_RATE, sequence, at)
    } else {
        AudioFrame::with_timestamp(vec![0; len], CALL_RATE, sequence, at)
    }
}

/// Feed frames faster than real time, timestamped as if real time
async fn speak(
    session: &BridgeSession,
    base: Instant,
    from: u64,
    voiced: u64,
    silent: u64,
) -> u64 {
    let mut seq = from;
    for _ in 0..voiced {
        session.on_audio_frame(call_frame(true, seq, base)).unwrap();
        seq += 1;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    for _ in 0..silent {
        session.on_audio_frame(call_frame(false, seq, base)).unwrap();
        seq += 1;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    seq
}

async fn wait_for(
    events: &mut broadcast::Receiver<BridgeEvent>,
    matches: impl Fn(&BridgeEvent) -> bool,
) -> BridgeEvent {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await;
    waited.expect("expected event never arrived")
}

async fn wait_until(condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    waited.expect("condition never held");
}

fn sequential_config() -> SequentialConfig {
    SequentialConfig {
        input_rate: SampleRate::Hz16000,
        vad: VadConfig {
            silence_duration_ms: 300,
            ..Default::default()
        },
        turns: TurnControllerConfig {
            silence_duration: Duration::from_millis(300),
            min_utterance: Duration::from_millis(200),
            barge_in: BargeInPolicy::Ignore,
            ..Default::default()
        },
        remote_timeout: Duration::from_secs(2),
        retain_audio: false,
    }
}

fn duplex_config() -> DuplexConfig {
    DuplexConfig {
        ready_timeout: Duration::from_secs(1),
        reconnect_attempts: 1,
        reconnect_backoff: Duration::from_millis(10),
        connect_timeout: Duration::from_secs(1),
        response_idle: Duration::from_secs(2),
        ..Default::default()
    }
}

fn start(bridge: impl Into<Bridge>, adapter: Arc<RecordingAdapter>) -> BridgeSession {
    BridgeSession::start(
        CallContext::new("call-1", CALL_RATE, FRAME_MS),
        adapter,
        bridge.into(),
        SessionConfig::default(),
    )
    .unwrap()
}

fn is_idle(event: &BridgeEvent) -> bool {
    matches!(
        event,
        BridgeEvent::StateChanged {
            to: TurnState::Idle,
            ..
        }
    )
}

// Sequential bridge

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_transcript_skips_reasoning_and_synthesis() {
    let llm = Arc::new(ScriptedLlm::default());
    let tts = Arc::new(ToneTts::default());
    let bridge = SequentialBridge::new(
        Arc::new(FixedStt("   ")),
        llm.clone(),
        tts.clone(),
        sequential_config(),
    );
    let session = start(bridge, Arc::new(RecordingAdapter::default()));
    let mut events = session.subscribe();

    speak(&session, Instant::now(), 0, 30, 40).await;

    let abandoned = wait_for(&mut events, |e| matches!(e, BridgeEvent::TurnAbandoned { .. })).await;
    assert!(matches!(
        abandoned,
        BridgeEvent::TurnAbandoned { ref reason } if reason == "empty transcript"
    ));
    wait_for(&mut events, is_idle).await;

    assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    assert_eq!(tts.calls.load(Ordering::SeqCst), 0);
    assert!(session.history().is_empty());
    assert_eq!(session.turn_state(), TurnState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_completed_turn_plays_reply_at_call_rate() {
    let adapter = Arc::new(RecordingAdapter::default());
    let bridge = SequentialBridge::new(
        Arc::new(FixedStt("hello")),
        Arc::new(ScriptedLlm::default()),
        Arc::new(ToneTts::default()),
        sequential_config(),
    );
    let session = start(bridge, adapter.clone());
    let mut events = session.subscribe();
    let base = Instant::now();

    let mut seq = speak(&session, base, 0, 30, 40).await;
    wait_for(&mut events, |e| matches!(e, BridgeEvent::TurnCompleted)).await;

    // Each inbound frame carries one outbound frame back to the call
    let mut finished = false;
    for _ in 0..300 {
        seq = speak(&session, base, seq, 0, 1).await;
        while let Ok(event) = events.try_recv() {
            if let BridgeEvent::StateChanged {
                from: TurnState::AssistantSpeaking,
                to: TurnState::Idle,
            } = event
            {
                finished = true;
            }
        }
        if finished {
            break;
        }
    }
    assert!(finished, "playback never completed");

    let played = adapter.frames.lock();
    assert!(played.len() >= 19, "only {} frames played", played.len());
    assert!(played
        .iter()
        .all(|f| f.sample_rate == CALL_RATE && f.len() == 160));

    let history = session.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, TurnRole::Caller);
    assert_eq!(history[0].text(), "hello");
    assert_eq!(history[1].role, TurnRole::Assistant);
    assert_eq!(history[1].text(), "Hi there");
    assert_eq!(session.turn_state(), TurnState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_cancels_in_flight_turn() {
    let cancelled = Arc::new(AtomicBool::new(false));
    let llm = Arc::new(ScriptedLlm {
        hang: Some(cancelled.clone()),
        ..Default::default()
    });
    let bridge = SequentialBridge::new(
        Arc::new(FixedStt("hello")),
        llm.clone(),
        Arc::new(ToneTts::default()),
        sequential_config(),
    );
    let adapter = Arc::new(RecordingAdapter::default());
    let session = start(bridge, adapter.clone());

    speak(&session, Instant::now(), 0, 30, 40).await;
    wait_until(|| llm.calls.load(Ordering::SeqCst) == 1).await;
    wait_until(|| session.turn_state() == TurnState::Processing).await;

    session.stop();
    session.stop();
    assert!(session.is_stopped());
    assert_eq!(session.turn_state(), TurnState::Idle);
    assert_eq!(session.outbound_depth(), 0);
    wait_until(|| cancelled.load(Ordering::SeqCst)).await;

    // Frames after stop are ignored
    session.on_audio_frame(call_frame(true, 500, Instant::now())).unwrap();
    assert!(adapter.frames.lock().is_empty());
}

#[test]
fn test_start_requires_runtime() {
    let bridge = SequentialBridge::new(
        Arc::new(FixedStt("hello")),
        Arc::new(ScriptedLlm::default()),
        Arc::new(ToneTts::default()),
        sequential_config(),
    );
    let result = BridgeSession::start(
        CallContext::new("call-1", CALL_RATE, FRAME_MS),
        Arc::new(RecordingAdapter::default()),
        bridge.into(),
        SessionConfig::default(),
    );
    assert!(matches!(result, Err(AgentError::NoRuntime)));
}

// Duplex bridge

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_barge_in_cancels_response_and_flushes_playout() {
    let (connector, mut ends) = ScriptedConnector::with_links(1);
    let (mut commands, backend) = ends.remove(0);
    let session = start(
        DuplexBridge::new(connector.clone(), duplex_config()),
        Arc::new(RecordingAdapter::default()),
    );
    let mut events = session.subscribe();

    backend.send(ServerEvent::Ready).await.unwrap();
    backend.send(ServerEvent::ResponseStarted).await.unwrap();
    for seq in 0..50 {
        // 20ms at the 24kHz session rate
        let delta = tone(480, SampleRate::Hz24000, seq, Instant::now());
        backend.send(ServerEvent::AudioDelta(delta)).await.unwrap();
    }

    let capacity = SessionConfig::default().outbound_queue_frames;
    wait_until(|| session.outbound_depth() == capacity).await;
    assert_eq!(session.turn_state(), TurnState::AssistantSpeaking);

    backend.send(ServerEvent::SpeechStarted).await.unwrap();
    wait_for(&mut events, |e| matches!(e, BridgeEvent::BargeIn)).await;
    assert_eq!(session.outbound_depth(), 0);
    wait_until(|| session.turn_state() == TurnState::CallerSpeaking).await;

    // Audio still in flight from the cancelled response is discarded
    let late = tone(480, SampleRate::Hz24000, 99, Instant::now());
    backend.send(ServerEvent::AudioDelta(late)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.outbound_depth(), 0);

    let mut cancelled = false;
    while let Ok(command) = commands.try_recv() {
        cancelled |= matches!(command, ClientEvent::CancelResponse);
    }
    assert!(cancelled, "response was not cancelled");
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_caller_turn_requests_response() {
    let (connector, mut ends) = ScriptedConnector::with_links(1);
    let (mut commands, backend) = ends.remove(0);
    let session = start(
        DuplexBridge::new(connector, duplex_config()),
        Arc::new(RecordingAdapter::default()),
    );

    backend.send(ServerEvent::Ready).await.unwrap();
    speak(&session, Instant::now(), 0, 3, 0).await;
    backend.send(ServerEvent::SpeechStarted).await.unwrap();
    backend.send(ServerEvent::SpeechStopped).await.unwrap();

    let mut appended = 0;
    let requested = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(command) = commands.recv().await {
            match command {
                ClientEvent::AppendAudio(frame) => {
                    assert_eq!(frame.sample_rate, SampleRate::Hz24000);
                    appended += 1;
                },
                ClientEvent::CreateResponse => return true,
                ClientEvent::CancelResponse => {},
            }
        }
        false
    })
    .await
    .unwrap();

    assert!(requested);
    assert!(appended > 0);
    wait_until(|| session.turn_state() == TurnState::Processing).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lost_session_is_reopened() {
    let (connector, mut ends) = ScriptedConnector::with_links(2);
    let (_first_commands, first) = ends.remove(0);
    let (_second_commands, second) = ends.remove(0);
    let session = start(
        DuplexBridge::new(connector.clone(), duplex_config()),
        Arc::new(RecordingAdapter::default()),
    );
    let mut events = session.subscribe();

    first.send(ServerEvent::Ready).await.unwrap();
    drop(first);

    wait_for(&mut events, |e| matches!(e, BridgeEvent::SessionLost { .. })).await;
    let restored = wait_for(&mut events, |e| matches!(e, BridgeEvent::SessionRestored { .. })).await;
    assert!(matches!(restored, BridgeEvent::SessionRestored { attempt: 1 }));
    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);

    second.send(ServerEvent::Ready).await.unwrap();
    second.send(ServerEvent::SpeechStarted).await.unwrap();
    wait_until(|| session.turn_state() == TurnState::CallerSpeaking).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_reopen_degrades() {
    let (connector, mut ends) = ScriptedConnector::with_links(1);
    let (_commands, backend) = ends.remove(0);
    let adapter = Arc::new(RecordingAdapter::default());
    let session = start(DuplexBridge::new(connector, duplex_config()), adapter.clone());
    let mut events = session.subscribe();

    backend.send(ServerEvent::Ready).await.unwrap();
    drop(backend);

    wait_for(&mut events, |e| matches!(e, BridgeEvent::SessionLost { .. })).await;
    wait_for(&mut events, |e| matches!(e, BridgeEvent::Degraded)).await;
    assert_eq!(session.turn_state(), TurnState::Idle);

    // The call stays up and keeps accepting audio
    speak(&session, Instant::now(), 0, 20, 20).await;
    assert_eq!(session.inbound_overruns(), 0);
    assert!(adapter.frames.lock().is_empty());
    assert!(!session.is_stopped());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_audio_during_slow_connect_is_forwarded() {
    let (scripted, mut ends) = ScriptedConnector::with_links(1);
    let (mut commands, backend) = ends.remove(0);
    let connector = Arc::new(SlowConnector {
        inner: scripted,
        delay: Duration::from_millis(800),
    });
    let session = start(
        DuplexBridge::new(connector, duplex_config()),
        Arc::new(RecordingAdapter::default()),
    );

    // Real-time caller, well past the inbound queue depth before the session opens
    let base = Instant::now();
    for seq in 0..40 {
        session.on_audio_frame(call_frame(true, seq, base)).unwrap();
        tokio::time::sleep(Duration::from_millis(FRAME_MS as u64)).await;
    }
    backend.send(ServerEvent::Ready).await.unwrap();

    let mut forwarded = 0;
    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(command) = commands.recv().await {
            if matches!(command, ClientEvent::AppendAudio(_)) {
                forwarded += 1;
                if forwarded == 40 {
                    break;
                }
            }
        }
    })
    .await;

    // the resampler may still hold the tail of the last frame
    assert!(forwarded >= 39, "forwarded {} of 40 frames", forwarded);
    assert_eq!(session.inbound_overruns(), 0);
}
