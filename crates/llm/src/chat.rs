//! Reasoning over the chat completions endpoint

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use voice_bridge_config::BackendSettings;
use voice_bridge_core::{ConversationTurn, LanguageModel, RemoteStage, Result, TurnRole};

use crate::http::HttpClient;
use crate::LlmError;

/// Chat completion settings
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Sent as the first message of every request
    pub system_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        use voice_bridge_config::constants::endpoints::CHAT_MODEL;
        use voice_bridge_config::constants::llm::{MAX_TOKENS, SYSTEM_PROMPT, TEMPERATURE};

        Self {
            model: CHAT_MODEL.to_string(),
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }
}

impl ChatConfig {
    pub fn from_settings(backend: &BackendSettings) -> Self {
        Self {
            model: backend.chat_model.clone(),
            max_tokens: backend.max_tokens,
            temperature: backend.temperature,
            system_prompt: backend.system_prompt.clone(),
        }
    }

    /// Reasoning models take `max_completion_tokens` and no temperature
    fn is_reasoning_model(&self) -> bool {
        let model = self.model.to_lowercase();
        model.starts_with("gpt-5") || model.starts_with("o1")
    }
}

/// Chat completions backend
pub struct HttpChat {
    http: HttpClient,
    config: ChatConfig,
}

impl HttpChat {
    pub fn new(http: HttpClient, config: ChatConfig) -> Self {
        Self { http, config }
    }

    fn build_request(&self, history: &[ConversationTurn]) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !self.config.system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: self.config.system_prompt.clone(),
            });
        }

        messages.extend(
            history
                .iter()
                .filter(|turn| !turn.text().is_empty())
                .map(|turn| ChatMessage {
                    role: match turn.role {
                        TurnRole::Caller => "user".to_string(),
                        TurnRole::Assistant => "assistant".to_string(),
                    },
                    content: turn.text().to_string(),
                }),
        );

        let reasoning = self.config.is_reasoning_model();
        ChatRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: (!reasoning).then_some(self.config.max_tokens),
            max_completion_tokens: reasoning.then_some(self.config.max_tokens),
            temperature: (!reasoning).then_some(self.config.temperature),
        }
    }

    async fn request(&self, history: &[ConversationTurn]) -> std::result::Result<String, LlmError> {
        let request = self.build_request(history);
        let url = self.http.url("/chat/completions");

        let response = self
            .http
            .execute("chat", |client| Ok(client.post(&url).json(&request)))
            .await?;

        let response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(LlmError::InvalidResponse("empty completion".to_string()));
        }
        Ok(text)
    }
}

#[async_trait]
impl LanguageModel for HttpChat {
    async fn respond(&self, history: &[ConversationTurn]) -> Result<String> {
        let start = Instant::now();
        let text = self
            .request(history)
            .await
            .map_err(|e| e.at(RemoteStage::Reason))?;

        tracing::debug!(
            model = %self.config.model,
            turns = history.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Chat completion complete"
        );
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}
