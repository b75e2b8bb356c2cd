//! Call adapter boundary

use voice_bridge_config::BridgeSettings;
use voice_bridge_core::{AudioFrame, SampleRate};

use crate::AgentError;

/// Media parameters of one call, fixed for its lifetime
#[derive(Debug, Clone)]
pub struct CallContext {
    pub call_id: String,
    /// Rate of the adapter's media, both directions
    pub sample_rate: SampleRate,
    pub frame_ms: u32,
}

impl CallContext {
    pub fn new(call_id: impl Into<String>, sample_rate: SampleRate, frame_ms: u32) -> Self {
        Self {
            call_id: call_id.into(),
            sample_rate,
            frame_ms,
        }
    }

    pub fn from_settings(
        call_id: impl Into<String>,
        bridge: &BridgeSettings,
    ) -> Result<Self, AgentError> {
        Ok(Self::new(
            call_id,
            SampleRate::from_hz(bridge.telephony_sample_rate)?,
            bridge.frame_ms,
        ))
    }

    /// Samples in one telephony frame
    pub fn frame_samples(&self) -> usize {
        self.sample_rate.samples_per_frame(self.frame_ms)
    }
}

/// Media side of a call, owned by the SIP/media layer
///
/// `send_audio_frame` is invoked from inside
/// [`BridgeSession::on_audio_frame`](crate::BridgeSession::on_audio_frame),
/// on the adapter's own real-time thread. It must not block.
pub trait CallAdapter: Send + Sync + 'static {
    /// Queue one outbound frame at the call rate for playback
    fn send_audio_frame(&self, frame: AudioFrame);
}
