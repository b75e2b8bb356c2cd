//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{audio, endpoints, llm, observability, queues, realtime, retry, timeouts, vad};
use crate::ConfigError;

/// Which bridge serves a call. Chosen once per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BridgeMode {
    /// Transcribe, reason and synthesize as three request/response calls
    #[default]
    Sequential,
    /// One persistent full-duplex streaming session
    Duplex,
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Bridge framing, queues and timeouts
    #[serde(default)]
    pub bridge: BridgeSettings,

    /// Local voice activity detection and turn timing
    #[serde(default)]
    pub vad: VadSettings,

    /// HTTP backends for the sequential bridge
    #[serde(default)]
    pub backend: BackendSettings,

    /// Streaming backend for the duplex bridge
    #[serde(default)]
    pub realtime: RealtimeSettings,

    /// Conversation history bound
    #[serde(default)]
    pub history: HistorySettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// WAV-driven call simulation (binary only)
    #[serde(default)]
    pub simulator: SimulatorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    #[serde(default)]
    pub mode: BridgeMode,

    /// Rate of the call adapter's media, both directions
    #[serde(default = "default_telephony_rate")]
    pub telephony_sample_rate: u32,

    /// Frame duration for both queues
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,

    #[serde(default = "default_inbound_frames")]
    pub inbound_queue_frames: usize,

    #[serde(default = "default_outbound_frames")]
    pub outbound_queue_frames: usize,

    /// Deadline for each remote request
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout_ms: u64,

    /// Deadline for connection setup
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_telephony_rate() -> u32 {
    audio::TELEPHONY_SAMPLE_RATE
}
fn default_frame_ms() -> u32 {
    audio::FRAME_MS
}
fn default_inbound_frames() -> usize {
    queues::INBOUND_FRAMES
}
fn default_outbound_frames() -> usize {
    queues::OUTBOUND_FRAMES
}
fn default_remote_timeout() -> u64 {
    timeouts::REMOTE_MS
}
fn default_connect_timeout() -> u64 {
    timeouts::CONNECT_MS
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            mode: BridgeMode::default(),
            telephony_sample_rate: default_telephony_rate(),
            frame_ms: default_frame_ms(),
            inbound_queue_frames: default_inbound_frames(),
            outbound_queue_frames: default_outbound_frames(),
            remote_timeout_ms: default_remote_timeout(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadSettings {
    /// Energy threshold in dBFS
    #[serde(default = "default_threshold_db")]
    pub threshold_db: f32,

    /// Silence that ends a caller turn; also sets the VAD hangover
    #[serde(default = "default_silence_ms")]
    pub silence_duration_ms: u32,

    #[serde(default = "default_min_utterance_ms")]
    pub min_utterance_ms: u32,

    #[serde(default = "default_max_utterance_ms")]
    pub max_utterance_ms: u32,
}

fn default_threshold_db() -> f32 {
    vad::THRESHOLD_DB
}
fn default_silence_ms() -> u32 {
    vad::SILENCE_DURATION_MS
}
fn default_min_utterance_ms() -> u32 {
    vad::MIN_UTTERANCE_MS
}
fn default_max_utterance_ms() -> u32 {
    vad::MAX_UTTERANCE_MS
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold_db: default_threshold_db(),
            silence_duration_ms: default_silence_ms(),
            min_utterance_ms: default_min_utterance_ms(),
            max_utterance_ms: default_max_utterance_ms(),
        }
    }
}

/// OpenAI-compatible REST backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Falls back to `OPENAI_API_KEY`
    #[serde(default = "default_api_key")]
    pub api_key: String,

    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    #[serde(default = "default_speech_model")]
    pub speech_model: String,

    #[serde(default = "default_voice")]
    pub voice: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Rate utterances are uploaded at
    #[serde(default = "default_transcription_rate")]
    pub sample_rate: u32,

    /// Native rate of synthesized PCM
    #[serde(default = "default_synthesis_rate")]
    pub speech_sample_rate: u32,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_base_url() -> String {
    endpoints::OPENAI_DEFAULT.to_string()
}
fn default_api_key() -> String {
    std::env::var("OPENAI_API_KEY")
        .map(|k| k.trim().to_string())
        .unwrap_or_default()
}
fn default_transcription_model() -> String {
    endpoints::TRANSCRIPTION_MODEL.to_string()
}
fn default_chat_model() -> String {
    endpoints::CHAT_MODEL.to_string()
}
fn default_speech_model() -> String {
    endpoints::SPEECH_MODEL.to_string()
}
fn default_voice() -> String {
    endpoints::VOICE.to_string()
}
fn default_max_tokens() -> u32 {
    llm::MAX_TOKENS
}
fn default_temperature() -> f32 {
    llm::TEMPERATURE
}
fn default_max_retries() -> u32 {
    retry::MAX_RETRIES
}
fn default_initial_backoff() -> u64 {
    retry::INITIAL_BACKOFF_MS
}
fn default_transcription_rate() -> u32 {
    audio::TRANSCRIPTION_SAMPLE_RATE
}
fn default_synthesis_rate() -> u32 {
    audio::SYNTHESIS_SAMPLE_RATE
}
fn default_system_prompt() -> String {
    llm::SYSTEM_PROMPT.to_string()
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: default_api_key(),
            transcription_model: default_transcription_model(),
            chat_model: default_chat_model(),
            speech_model: default_speech_model(),
            voice: default_voice(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            sample_rate: default_transcription_rate(),
            speech_sample_rate: default_synthesis_rate(),
            system_prompt: default_system_prompt(),
        }
    }
}

/// Realtime streaming session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeSettings {
    #[serde(default = "default_realtime_url")]
    pub url: String,

    #[serde(default = "default_realtime_model")]
    pub model: String,

    #[serde(default = "default_voice")]
    pub voice: String,

    #[serde(default = "default_realtime_rate")]
    pub sample_rate: u32,

    /// Server VAD sensitivity (0.0 - 1.0)
    #[serde(default = "default_vad_threshold")]
    pub vad_threshold: f32,

    /// Lead-in padding kept before detected speech
    #[serde(default = "default_prefix_padding")]
    pub prefix_padding_ms: u32,

    #[serde(default = "default_silence_ms")]
    pub silence_duration_ms: u32,

    /// Request a response as soon as the server ends a caller turn
    #[serde(default = "default_true")]
    pub auto_response: bool,

    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_ms: u64,

    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_ms: u64,

    #[serde(default = "default_response_idle")]
    pub response_idle_ms: u64,

    #[serde(default = "default_system_prompt")]
    pub instructions: String,
}

fn default_realtime_url() -> String {
    endpoints::OPENAI_REALTIME_DEFAULT.to_string()
}
fn default_realtime_model() -> String {
    endpoints::REALTIME_MODEL.to_string()
}
fn default_realtime_rate() -> u32 {
    audio::REALTIME_SAMPLE_RATE
}
fn default_vad_threshold() -> f32 {
    realtime::VAD_THRESHOLD
}
fn default_prefix_padding() -> u32 {
    realtime::PREFIX_PADDING_MS
}
fn default_true() -> bool {
    true
}
fn default_ready_timeout() -> u64 {
    timeouts::REALTIME_READY_MS
}
fn default_reconnect_attempts() -> u32 {
    retry::RECONNECT_ATTEMPTS
}
fn default_reconnect_backoff() -> u64 {
    retry::RECONNECT_BACKOFF_MS
}
fn default_response_idle() -> u64 {
    timeouts::RESPONSE_IDLE_MS
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            url: default_realtime_url(),
            model: default_realtime_model(),
            voice: default_voice(),
            sample_rate: default_realtime_rate(),
            vad_threshold: default_vad_threshold(),
            prefix_padding_ms: default_prefix_padding(),
            silence_duration_ms: default_silence_ms(),
            auto_response: true,
            ready_timeout_ms: default_ready_timeout(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_backoff_ms: default_reconnect_backoff(),
            response_idle_ms: default_response_idle(),
            instructions: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySettings {
    /// Sliding window of retained turns
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Keep synthesized PCM on assistant turns
    #[serde(default)]
    pub retain_audio: bool,
}

fn default_max_turns() -> usize {
    llm::HISTORY_MAX_TURNS
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            retain_audio: false,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    /// Install the Prometheus exporter
    #[serde(default)]
    pub metrics_enabled: bool,

    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_log_level() -> String {
    observability::LOG_LEVEL.to_string()
}
fn default_metrics_port() -> u16 {
    observability::METRICS_PORT
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: false,
            metrics_port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorSettings {
    /// Mono 16-bit WAV played as the caller
    #[serde(default)]
    pub input_wav: Option<String>,

    /// Where outbound audio is recorded
    #[serde(default = "default_output_wav")]
    pub output_wav: String,

    /// Silence fed after the input ends, before the call is hung up
    #[serde(default = "default_tail_ms")]
    pub tail_ms: u64,
}

fn default_output_wav() -> String {
    "bridge-output.wav".to_string()
}
fn default_tail_ms() -> u64 {
    3000
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            input_wav: None,
            output_wav: default_output_wav(),
            tail_ms: default_tail_ms(),
        }
    }
}

impl Settings {
    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_bridge()?;
        self.validate_vad()?;
        self.validate_rates()?;
        self.validate_realtime()?;

        if self.history.max_turns == 0 {
            return Err(invalid("history.max_turns", "must keep at least one turn"));
        }

        Ok(())
    }

    fn validate_bridge(&self) -> Result<(), ConfigError> {
        let bridge = &self.bridge;

        if !(10..=60).contains(&bridge.frame_ms) || 1000 % bridge.frame_ms != 0 {
            return Err(invalid(
                "bridge.frame_ms",
                "frame duration must divide one second and lie in 10..=60ms",
            ));
        }

        for (field, depth) in [
            ("bridge.inbound_queue_frames", bridge.inbound_queue_frames),
            ("bridge.outbound_queue_frames", bridge.outbound_queue_frames),
        ] {
            if !(queues::MIN_FRAMES..=queues::MAX_FRAMES).contains(&depth) {
                return Err(invalid(
                    field,
                    &format!(
                        "queue depth must be {}..={} frames",
                        queues::MIN_FRAMES,
                        queues::MAX_FRAMES
                    ),
                ));
            }
        }

        if bridge.remote_timeout_ms == 0 || bridge.connect_timeout_ms == 0 {
            return Err(invalid("bridge.remote_timeout_ms", "timeouts must be non-zero"));
        }

        Ok(())
    }

    fn validate_vad(&self) -> Result<(), ConfigError> {
        let v = &self.vad;

        if !(vad::FLOOR_DB..0.0).contains(&v.threshold_db) {
            return Err(invalid("vad.threshold_db", "threshold must lie in -96..0 dBFS"));
        }

        if v.silence_duration_ms == 0 {
            return Err(invalid("vad.silence_duration_ms", "must be greater than zero"));
        }

        if v.min_utterance_ms > v.max_utterance_ms {
            return Err(invalid(
                "vad.min_utterance_ms",
                "must not exceed vad.max_utterance_ms",
            ));
        }

        Ok(())
    }

    fn validate_rates(&self) -> Result<(), ConfigError> {
        for (field, rate) in [
            ("bridge.telephony_sample_rate", self.bridge.telephony_sample_rate),
            ("backend.sample_rate", self.backend.sample_rate),
            ("backend.speech_sample_rate", self.backend.speech_sample_rate),
            ("realtime.sample_rate", self.realtime.sample_rate),
        ] {
            if !audio::SUPPORTED_SAMPLE_RATES.contains(&rate) {
                return Err(invalid(field, &format!("unsupported sample rate {}Hz", rate)));
            }
            if (rate * self.bridge.frame_ms) % 1000 != 0 {
                return Err(invalid(
                    field,
                    "rate does not yield a whole number of samples per frame",
                ));
            }
        }
        Ok(())
    }

    fn validate_realtime(&self) -> Result<(), ConfigError> {
        let rt = &self.realtime;

        if !(0.0..=1.0).contains(&rt.vad_threshold) {
            return Err(invalid("realtime.vad_threshold", "must lie in 0.0..=1.0"));
        }

        if rt.silence_duration_ms == 0 {
            return Err(invalid("realtime.silence_duration_ms", "must be greater than zero"));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Load settings from files and environment
///
/// Priority: env vars > config/{env} > config/default > defaults
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_BRIDGE")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
