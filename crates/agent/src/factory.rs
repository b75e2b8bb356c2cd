//! Bridge construction from settings

use std::sync::Arc;
use voice_bridge_config::{BridgeMode, Settings};
use voice_bridge_llm::{
    ChatConfig, HttpChat, HttpClient, HttpConfig, HttpSynthesizer, HttpTranscriber,
    OpenAiRealtime, RealtimeConfig, SpeechConfig, TranscriptionConfig,
};

use crate::{AgentError, Bridge, DuplexBridge, DuplexConfig, SequentialBridge, SequentialConfig};

/// Build the bridge `settings.bridge.mode` selects, backed by the
/// OpenAI-compatible HTTP or realtime backends
pub fn build_bridge(settings: &Settings) -> Result<Bridge, AgentError> {
    settings.validate()?;

    let bridge = match settings.bridge.mode {
        BridgeMode::Sequential => {
            let backend = &settings.backend;
            let http = HttpClient::new(HttpConfig::from_settings(backend, &settings.bridge))?;

            let stt = HttpTranscriber::new(
                http.clone(),
                TranscriptionConfig {
                    model: backend.transcription_model.clone(),
                    ..Default::default()
                },
            );
            let llm = HttpChat::new(http.clone(), ChatConfig::from_settings(backend));
            let tts = HttpSynthesizer::new(http, SpeechConfig::from_settings(backend)?);

            Bridge::from(SequentialBridge::new(
                Arc::new(stt),
                Arc::new(llm),
                Arc::new(tts),
                SequentialConfig::from_settings(settings)?,
            ))
        },
        BridgeMode::Duplex => {
            let connector = OpenAiRealtime::new(RealtimeConfig::from_settings(
                &settings.realtime,
                &settings.backend,
                &settings.bridge,
            ))?;
            Bridge::from(DuplexBridge::new(
                Arc::new(connector),
                DuplexConfig::from_settings(settings)?,
            ))
        },
    };

    tracing::debug!(bridge = bridge.name(), "Bridge built");
    Ok(bridge)
}
