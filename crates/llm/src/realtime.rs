//! OpenAI realtime WebSocket sessions
//!
//! One WebSocket per call. After the handshake the session is configured
//! with `session.update` (PCM both ways at the session rate, server-side
//! VAD). Two tasks then pump the socket: a writer draining
//! [`ClientEvent`]s and a reader decoding server messages into
//! [`ServerEvent`]s. When the socket closes the reader drops its sender,
//! so the bridge sees `None` on `events`.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use voice_bridge_config::{BackendSettings, BridgeSettings, RealtimeSettings};
use voice_bridge_core::{
    AudioFrame, ClientEvent, RealtimeConnector, RealtimeLink, RealtimeSessionConfig, RemoteStage,
    Result, SampleRate, ServerEvent, TurnRole,
};

use crate::LlmError;

/// Connection settings for the realtime endpoint
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// WebSocket endpoint; the model is appended as a query parameter
    pub url: String,
    pub api_key: String,
    /// TCP, TLS and WebSocket handshake deadline
    pub connect_timeout: Duration,
    /// Buffered messages per direction
    pub channel_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        use voice_bridge_config::constants::endpoints::OPENAI_REALTIME_DEFAULT;
        use voice_bridge_config::constants::timeouts::CONNECT_MS;

        Self {
            url: OPENAI_REALTIME_DEFAULT.to_string(),
            api_key: String::new(),
            connect_timeout: Duration::from_millis(CONNECT_MS),
            channel_capacity: 256,
        }
    }
}

impl RealtimeConfig {
    pub fn from_settings(
        realtime: &RealtimeSettings,
        backend: &BackendSettings,
        bridge: &BridgeSettings,
    ) -> Self {
        Self {
            url: realtime.url.clone(),
            api_key: backend.api_key.clone(),
            connect_timeout: Duration::from_millis(bridge.connect_timeout_ms),
            ..Default::default()
        }
    }
}

/// Realtime session connector
pub struct OpenAiRealtime {
    config: RealtimeConfig,
}

impl OpenAiRealtime {
    pub fn new(config: RealtimeConfig) -> std::result::Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::Configuration(
                "API key required for realtime sessions".to_string(),
            ));
        }
        Ok(Self { config })
    }

    async fn open(
        &self,
        session: &RealtimeSessionConfig,
    ) -> std::result::Result<RealtimeLink, LlmError> {
        let url = format!("{}?model={}", self.config.url, session.model);
        let mut request = url.as_str().into_client_request()?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .map_err(|e| LlmError::Configuration(format!("invalid API key header: {}", e)))?;
        request.headers_mut().insert("Authorization", auth);

        tracing::info!(url = %self.config.url, model = %session.model, "Connecting realtime session");
        let (socket, _) = tokio::time::timeout(self.config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| LlmError::Timeout)??;

        let (mut sink, mut stream) = socket.split();
        sink.send(Message::Text(session_update(session).to_string()))
            .await?;

        let (link, mut commands, events) = RealtimeLink::pair(self.config.channel_capacity);
        let rate = session.sample_rate;

        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                if let Err(e) = sink.send(Message::Text(encode_client_event(&command))).await {
                    tracing::warn!(error = %e, "Realtime send failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            let mut decoder = EventDecoder::new(rate);
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if let Some(event) = decoder.decode(&text) {
                            if events.send(event).await.is_err() {
                                break;
                            }
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::info!(?frame, "Realtime session closed by server");
                        break;
                    },
                    Ok(_) => {},
                    Err(e) => {
                        tracing::warn!(error = %e, "Realtime receive failed");
                        break;
                    },
                }
            }
        });

        Ok(link)
    }
}

#[async_trait]
impl RealtimeConnector for OpenAiRealtime {
    async fn connect(&self, config: &RealtimeSessionConfig) -> Result<RealtimeLink> {
        self.open(config).await.map_err(|e| e.at(RemoteStage::Stream))
    }

    fn name(&self) -> &str {
        "openai-realtime"
    }
}

/// `session.update` payload configuring audio and server VAD
pub fn session_update(session: &RealtimeSessionConfig) -> Value {
    let rate = session.sample_rate.as_u32();
    json!({
        "type": "session.update",
        "session": {
            "type": "realtime",
            "model": session.model,
            "output_modalities": ["audio"],
            "audio": {
                "input": {
                    "format": { "type": "audio/pcm", "rate": rate },
                    "turn_detection": {
                        "type": "server_vad",
                        "threshold": session.vad_threshold,
                        "prefix_padding_ms": session.prefix_padding_ms,
                        "silence_duration_ms": session.silence_duration_ms,
                    },
                },
                "output": {
                    "format": { "type": "audio/pcm", "rate": rate },
                    "voice": session.voice,
                },
            },
            "instructions": session.instructions,
        },
    })
}

/// Serialize a client event to its wire message
pub fn encode_client_event(event: &ClientEvent) -> String {
    let value = match event {
        ClientEvent::AppendAudio(frame) => json!({
            "type": "input_audio_buffer.append",
            "audio": STANDARD.encode(frame.to_pcm16_le()),
        }),
        ClientEvent::CreateResponse => json!({ "type": "response.create" }),
        ClientEvent::CancelResponse => json!({ "type": "response.cancel" }),
    };
    value.to_string()
}

/// Decodes server messages, numbering audio chunks as they arrive
pub struct EventDecoder {
    sample_rate: SampleRate,
    sequence: u64,
}

impl EventDecoder {
    pub fn new(sample_rate: SampleRate) -> Self {
        Self {
            sample_rate,
            sequence: 0,
        }
    }

    /// Map one server message; unknown types yield `None`
    pub fn decode(&mut self, text: &str) -> Option<ServerEvent> {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable realtime message");
                return None;
            },
        };
        let kind = value.get("type").and_then(Value::as_str)?;
        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let event = match kind {
            "session.created" | "session.updated" => ServerEvent::Ready,
            "input_audio_buffer.speech_started" => ServerEvent::SpeechStarted,
            "input_audio_buffer.speech_stopped" => ServerEvent::SpeechStopped,
            "response.created" => ServerEvent::ResponseStarted,
            "response.done" => ServerEvent::ResponseDone,
            "response.output_audio.delta" | "response.audio.delta" => {
                return self.audio_delta(&field("delta"));
            },
            "response.output_audio_transcript.delta" | "response.audio_transcript.delta" => {
                ServerEvent::Transcript {
                    role: TurnRole::Assistant,
                    text: field("delta"),
                    is_final: false,
                }
            },
            "response.output_audio_transcript.done" | "response.audio_transcript.done" => {
                ServerEvent::Transcript {
                    role: TurnRole::Assistant,
                    text: field("transcript"),
                    is_final: true,
                }
            },
            "conversation.item.input_audio_transcription.completed" => ServerEvent::Transcript {
                role: TurnRole::Caller,
                text: field("transcript"),
                is_final: true,
            },
            "error" => ServerEvent::Error {
                message: value
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown realtime error")
                    .to_string(),
            },
            other => {
                tracing::trace!(event = other, "Ignoring realtime event");
                return None;
            },
        };

        Some(event)
    }

    fn audio_delta(&mut self, payload: &str) -> Option<ServerEvent> {
        let bytes = match STANDARD.decode(payload) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid base64 in audio delta");
                return None;
            },
        };

        match AudioFrame::from_pcm16_le(&bytes, self.sample_rate, self.sequence) {
            Ok(frame) => {
                self.sequence += 1;
                Some(ServerEvent::AudioDelta(frame))
            },
            Err(e) => {
                tracing::warn!(error = %e, "Malformed audio delta");
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> RealtimeSessionConfig {
        RealtimeSessionConfig {
            model: "gpt-realtime".to_string(),
            voice: "alloy".to_string(),
            instructions: "Be brief.".to_string(),
            sample_rate: SampleRate::Hz24000,
            vad_threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 1000,
        }
    }

    #[test]
    fn test_session_update_shape() {
        let update = session_update(&session());
        assert_eq!(update["type"], "session.update");
        assert_eq!(update["session"]["output_modalities"][0], "audio");
        assert_eq!(update["session"]["audio"]["input"]["format"]["type"], "audio/pcm");
        assert_eq!(update["session"]["audio"]["input"]["format"]["rate"], 24000);

        let vad = &update["session"]["audio"]["input"]["turn_detection"];
        assert_eq!(vad["type"], "server_vad");
        assert_eq!(vad["prefix_padding_ms"], 300);
        assert_eq!(vad["silence_duration_ms"], 1000);
        assert_eq!(update["session"]["audio"]["output"]["voice"], "alloy");
    }

    #[test]
    fn test_append_audio_is_base64_pcm() {
        let frame = AudioFrame::new(vec![1, -1], SampleRate::Hz24000, 0);
        let wire: Value =
            serde_json::from_str(&encode_client_event(&ClientEvent::AppendAudio(frame))).unwrap();

        assert_eq!(wire["type"], "input_audio_buffer.append");
        let bytes = STANDARD.decode(wire["audio"].as_str().unwrap()).unwrap();
        assert_eq!(bytes, vec![0x01, 0x00, 0xff, 0xff]);
    }

    #[test]
    fn test_response_control_messages() {
        assert!(encode_client_event(&ClientEvent::CreateResponse).contains("response.create"));
        assert!(encode_client_event(&ClientEvent::CancelResponse).contains("response.cancel"));
    }

    #[test]
    fn test_decode_turn_signals() {
        let mut decoder = EventDecoder::new(SampleRate::Hz24000);
        assert!(matches!(
            decoder.decode(r#"{"type":"session.updated"}"#),
            Some(ServerEvent::Ready)
        ));
        assert!(matches!(
            decoder.decode(r#"{"type":"input_audio_buffer.speech_started"}"#),
            Some(ServerEvent::SpeechStarted)
        ));
        assert!(matches!(
            decoder.decode(r#"{"type":"input_audio_buffer.speech_stopped"}"#),
            Some(ServerEvent::SpeechStopped)
        ));
        assert!(matches!(
            decoder.decode(r#"{"type":"response.created"}"#),
            Some(ServerEvent::ResponseStarted)
        ));
        assert!(matches!(
            decoder.decode(r#"{"type":"response.done"}"#),
            Some(ServerEvent::ResponseDone)
        ));
    }

    #[test]
    fn test_decode_audio_delta() {
        let mut decoder = EventDecoder::new(SampleRate::Hz24000);
        let payload = STANDARD.encode([0x10u8, 0x00, 0x20, 0x00]);

        for (i, kind) in ["response.output_audio.delta", "response.audio.delta"]
            .iter()
            .enumerate()
        {
            let msg = json!({ "type": kind, "delta": payload }).to_string();
            match decoder.decode(&msg) {
                Some(ServerEvent::AudioDelta(frame)) => {
                    assert_eq!(&*frame.samples, &[16, 32]);
                    assert_eq!(frame.sample_rate, SampleRate::Hz24000);
                    assert_eq!(frame.sequence, i as u64);
                },
                other => panic!("expected audio delta, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_decode_transcripts() {
        let mut decoder = EventDecoder::new(SampleRate::Hz24000);
        match decoder.decode(
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"hi"}"#,
        ) {
            Some(ServerEvent::Transcript { role, text, is_final }) => {
                assert_eq!(role, TurnRole::Caller);
                assert_eq!(text, "hi");
                assert!(is_final);
            },
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            decoder.decode(r#"{"type":"response.output_audio_transcript.delta","delta":"Hel"}"#),
            Some(ServerEvent::Transcript { is_final: false, .. })
        ));
    }

    #[test]
    fn test_decode_error_and_unknown() {
        let mut decoder = EventDecoder::new(SampleRate::Hz24000);
        match decoder.decode(r#"{"type":"error","error":{"message":"bad audio"}}"#) {
            Some(ServerEvent::Error { message }) => assert_eq!(message, "bad audio"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(decoder.decode(r#"{"type":"rate_limits.updated"}"#).is_none());
        assert!(decoder.decode("not json").is_none());
        assert!(decoder
            .decode(r#"{"type":"response.output_audio.delta","delta":"!!!"}"#)
            .is_none());
    }

    #[test]
    fn test_api_key_required() {
        assert!(matches!(
            OpenAiRealtime::new(RealtimeConfig::default()),
            Err(LlmError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_stream_failure() {
        let connector = OpenAiRealtime::new(RealtimeConfig {
            url: "ws://127.0.0.1:9".to_string(),
            api_key: "test".to_string(),
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap();

        let err = connector.connect(&session()).await.unwrap_err();
        assert_eq!(err.stage(), Some(RemoteStage::Stream));
    }
}
