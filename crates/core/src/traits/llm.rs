//! Reasoning backend trait

use crate::{ConversationTurn, Result};
use async_trait::async_trait;

/// Text-in/text-out reasoning step
///
/// Receives the retained conversation history, oldest first, with the
/// caller's latest turn at the end. System instructions are the
/// implementation's concern.
#[async_trait]
pub trait LanguageModel: Send + Sync + 'static {
    /// Produce the assistant reply for the conversation so far
    async fn respond(&self, history: &[ConversationTurn]) -> Result<String>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}
