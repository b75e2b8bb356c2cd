//! Text-to-speech over the OpenAI speech endpoint

use async_trait::async_trait;
use serde::Serialize;
use std::time::Instant;
use voice_bridge_config::BackendSettings;
use voice_bridge_core::{AudioFrame, RemoteStage, Result, SampleRate, TextToSpeech};

use crate::http::HttpClient;
use crate::LlmError;

/// Synthesis settings
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub model: String,
    pub voice: String,
    /// Rate of the raw PCM the endpoint returns
    pub sample_rate: SampleRate,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            model: voice_bridge_config::constants::endpoints::SPEECH_MODEL.to_string(),
            voice: voice_bridge_config::constants::endpoints::VOICE.to_string(),
            sample_rate: SampleRate::Hz24000,
        }
    }
}

impl SpeechConfig {
    pub fn from_settings(backend: &BackendSettings) -> Result<Self> {
        Ok(Self {
            model: backend.speech_model.clone(),
            voice: backend.voice.clone(),
            sample_rate: SampleRate::from_hz(backend.speech_sample_rate)?,
        })
    }
}

/// Requests raw 16-bit PCM so no container decoding is needed
pub struct HttpSynthesizer {
    http: HttpClient,
    config: SpeechConfig,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'static str,
}

impl HttpSynthesizer {
    pub fn new(http: HttpClient, config: SpeechConfig) -> Self {
        Self { http, config }
    }

    async fn request(&self, text: &str) -> std::result::Result<Vec<u8>, LlmError> {
        let request = SpeechRequest {
            model: &self.config.model,
            voice: &self.config.voice,
            input: text,
            response_format: "pcm",
        };
        let url = self.http.url("/audio/speech");

        let response = self
            .http
            .execute("synthesize", |client| Ok(client.post(&url).json(&request)))
            .await?;

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl TextToSpeech for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioFrame> {
        let start = Instant::now();
        let mut pcm = self
            .request(text)
            .await
            .map_err(|e| e.at(RemoteStage::Synthesize))?;

        // a trailing half sample carries no audio
        if pcm.len() % 2 != 0 {
            pcm.pop();
        }
        let audio = AudioFrame::from_pcm16_le(&pcm, self.config.sample_rate, 0)?;

        tracing::debug!(
            model = %self.config.model,
            voice = %self.config.voice,
            chars = text.len(),
            audio_ms = audio.duration.as_millis() as u64,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Synthesis complete"
        );
        Ok(audio)
    }

    fn sample_rate(&self) -> SampleRate {
        self.config.sample_rate
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
