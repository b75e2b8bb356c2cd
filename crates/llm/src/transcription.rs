//! Speech-to-text over the OpenAI transcription endpoint

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Instant;
use voice_bridge_core::{AudioFrame, RemoteStage, Result, SpeechToText};

use crate::http::HttpClient;
use crate::wav::encode_wav;
use crate::LlmError;

/// Transcription request settings
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub model: String,
    /// ISO-639-1 hint; auto-detected when unset
    pub language: Option<String>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model: voice_bridge_config::constants::endpoints::TRANSCRIPTION_MODEL.to_string(),
            language: None,
        }
    }
}

/// Uploads complete utterances as WAV and returns the plain-text transcript
pub struct HttpTranscriber {
    http: HttpClient,
    config: TranscriptionConfig,
}

impl HttpTranscriber {
    pub fn new(http: HttpClient, config: TranscriptionConfig) -> Self {
        Self { http, config }
    }

    fn form(&self, wav: &[u8]) -> std::result::Result<Form, LlmError> {
        let file = Part::bytes(wav.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| LlmError::Configuration(e.to_string()))?;

        let mut form = Form::new()
            .part("file", file)
            .text("model", self.config.model.clone())
            .text("response_format", "text");
        if let Some(language) = &self.config.language {
            form = form.text("language", language.clone());
        }
        Ok(form)
    }

    async fn request(&self, audio: &AudioFrame) -> std::result::Result<String, LlmError> {
        let wav = encode_wav(audio)?;
        let url = self.http.url("/audio/transcriptions");

        let response = self
            .http
            .execute("transcribe", |client| Ok(client.post(&url).multipart(self.form(&wav)?)))
            .await?;

        let text = response.text().await?;
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl SpeechToText for HttpTranscriber {
    async fn transcribe(&self, audio: &AudioFrame) -> Result<String> {
        let start = Instant::now();
        let text = self
            .request(audio)
            .await
            .map_err(|e| e.at(RemoteStage::Transcribe))?;

        tracing::debug!(
            model = %self.config.model,
            audio_ms = audio.duration.as_millis() as u64,
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = text.len(),
            "Transcription complete"
        );
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpConfig;

    fn local_client() -> HttpClient {
        HttpClient::new(HttpConfig {
            base_url: "http://localhost:1/v1".to_string(),
            max_retries: 0,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = TranscriptionConfig::default();
        assert_eq!(config.model, "whisper-1");
        assert!(config.language.is_none());
    }

    #[test]
    fn test_model_name() {
        let stt = HttpTranscriber::new(local_client(), TranscriptionConfig::default());
        assert_eq!(stt.model_name(), "whisper-1");
    }

    #[tokio::test]
    async fn test_unreachable_backend_maps_to_transcribe_stage() {
        let stt = HttpTranscriber::new(local_client(), TranscriptionConfig::default());
        let audio = AudioFrame::new(vec![0; 1600], voice_bridge_core::SampleRate::Hz16000, 0);

        let err = stt.transcribe(&audio).await.unwrap_err();
        assert_eq!(err.stage(), Some(RemoteStage::Transcribe));
    }
}
