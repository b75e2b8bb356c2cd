//! Energy VAD with hangover

use parking_lot::Mutex;
use voice_bridge_core::AudioFrame;

use super::{VadDecision, VadResult};

/// VAD configuration
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Speech threshold in dBFS
    pub threshold_db: f32,
    /// Consecutive quiet audio needed to end speech
    pub silence_duration_ms: u32,
    /// Duration of each frame fed to the detector
    pub frame_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        use voice_bridge_config::constants::audio::FRAME_MS;
        use voice_bridge_config::constants::vad::{SILENCE_DURATION_MS, THRESHOLD_DB};

        Self {
            threshold_db: THRESHOLD_DB,
            silence_duration_ms: SILENCE_DURATION_MS,
            frame_ms: FRAME_MS,
        }
    }
}

impl VadConfig {
    pub fn from_settings(vad: &voice_bridge_config::VadSettings, frame_ms: u32) -> Self {
        Self {
            threshold_db: vad.threshold_db,
            silence_duration_ms: vad.silence_duration_ms,
            frame_ms,
        }
    }

    /// Quiet frames needed to end speech, rounded up to whole frames
    pub fn hangover_frames(&self) -> u32 {
        self.silence_duration_ms
            .div_ceil(self.frame_ms.max(1))
            .max(1)
    }
}

struct VadMutableState {
    in_speech: bool,
    quiet_frames: u32,
}

/// Energy-threshold voice activity detector
pub struct EnergyVad {
    config: VadConfig,
    hangover: u32,
    state: Mutex<VadMutableState>,
}

impl EnergyVad {
    pub fn new(config: VadConfig) -> Self {
        let hangover = config.hangover_frames();
        Self {
            config,
            hangover,
            state: Mutex::new(VadMutableState {
                in_speech: false,
                quiet_frames: 0,
            }),
        }
    }

    /// Classify one frame and advance the hangover state
    pub fn process(&self, frame: &AudioFrame) -> VadResult {
        let loud = frame.energy_db >= self.config.threshold_db;
        let mut state = self.state.lock();

        let result = match (state.in_speech, loud) {
            (false, false) => VadResult::Silence,
            (false, true) => {
                state.in_speech = true;
                state.quiet_frames = 0;
                VadResult::SpeechStart
            },
            (true, true) => {
                state.quiet_frames = 0;
                VadResult::SpeechContinue
            },
            (true, false) => {
                state.quiet_frames += 1;
                if state.quiet_frames >= self.hangover {
                    state.in_speech = false;
                    state.quiet_frames = 0;
                    VadResult::SpeechEnd
                } else {
                    VadResult::PotentialSpeechEnd
                }
            },
        };

        tracing::trace!(
            sequence = frame.sequence,
            energy_db = frame.energy_db,
            ?result,
            "VAD frame"
        );

        result
    }

    /// Smoothed speech/silence decision for one frame
    pub fn classify(&self, frame: &AudioFrame) -> VadDecision {
        self.process(frame).decision()
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.in_speech = false;
        state.quiet_frames = 0;
    }

    pub fn in_speech(&self) -> bool {
        self.state.lock().in_speech
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    pub fn hangover_frames(&self) -> u32 {
        self.hangover
    }
}
