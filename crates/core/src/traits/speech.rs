//! Speech processing traits

use crate::{AudioFrame, Result, SampleRate};
use async_trait::async_trait;

/// Speech-to-Text interface
///
/// # Example
///
/// ```ignore
/// let stt: Arc<dyn SpeechToText> = Arc::new(HttpTranscriber::new(config)?);
/// let text = stt.transcribe(&utterance.into_frame()).await?;
/// ```
#[async_trait]
pub trait SpeechToText: Send + Sync + 'static {
    /// Transcribe one complete caller utterance
    ///
    /// An utterance with no recognizable speech yields an empty string,
    /// not an error.
    async fn transcribe(&self, audio: &AudioFrame) -> Result<String>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}

/// Text-to-Speech interface
#[async_trait]
pub trait TextToSpeech: Send + Sync + 'static {
    /// Synthesize text to audio at [`TextToSpeech::sample_rate`]
    async fn synthesize(&self, text: &str) -> Result<AudioFrame>;

    /// Native output rate of the synthesized PCM
    fn sample_rate(&self) -> SampleRate;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}
