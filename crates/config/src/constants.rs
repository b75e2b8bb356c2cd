//! Centralized constants for the voice bridge
//!
//! Single source of truth for default values. Settings defaults, the VAD
//! and the backends all read from here instead of repeating literals.

/// Audio framing and rates
pub mod audio {
    /// Telephony media rate (narrowband)
    pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

    /// Rate utterances are uploaded at for transcription
    pub const TRANSCRIPTION_SAMPLE_RATE: u32 = 16000;

    /// Native PCM rate of HTTP speech synthesis
    pub const SYNTHESIS_SAMPLE_RATE: u32 = 24000;

    /// Rate of the realtime streaming session, both directions
    pub const REALTIME_SAMPLE_RATE: u32 = 24000;

    /// Duration of every frame flowing through the queues
    pub const FRAME_MS: u32 = 20;

    /// Rates accepted anywhere in the bridge
    pub const SUPPORTED_SAMPLE_RATES: &[u32] = &[8000, 16000, 22050, 24000, 44100, 48000];
}

/// Frame queue depths
pub mod queues {
    /// Inbound (caller to bridge) depth in frames, 300ms at 20ms frames
    pub const INBOUND_FRAMES: usize = 15;

    /// Outbound (bridge to caller) depth in frames
    pub const OUTBOUND_FRAMES: usize = 15;

    pub const MIN_FRAMES: usize = 2;
    pub const MAX_FRAMES: usize = 50;

    /// Log every Nth overrun after the first
    pub const OVERRUN_LOG_EVERY: u64 = 50;
}

/// Voice activity detection
pub mod vad {
    /// Energy threshold in dBFS
    pub const THRESHOLD_DB: f32 = -40.0;

    /// Silence that ends a caller turn
    pub const SILENCE_DURATION_MS: u32 = 1000;

    /// Utterances with less voiced audio than this are discarded
    pub const MIN_UTTERANCE_MS: u32 = 300;

    /// Utterances are finalized once they reach this length
    pub const MAX_UTTERANCE_MS: u32 = 30_000;

    /// Lowest meaningful threshold (PCM16 noise floor)
    pub const FLOOR_DB: f32 = -96.0;
}

/// Timeouts for remote work
pub mod timeouts {
    /// Per remote request (transcribe, reason, synthesize)
    pub const REMOTE_MS: u64 = 15_000;

    /// TCP/TLS connect and WebSocket handshake
    pub const CONNECT_MS: u64 = 5_000;

    /// Wait for the streaming session to report ready
    pub const REALTIME_READY_MS: u64 = 5_000;

    /// Streaming response considered finished after this long without audio
    pub const RESPONSE_IDLE_MS: u64 = 300;
}

/// Retry policy for HTTP backends
pub mod retry {
    pub const MAX_RETRIES: u32 = 2;
    pub const INITIAL_BACKOFF_MS: u64 = 200;

    /// Streaming session reopen attempts after a drop
    pub const RECONNECT_ATTEMPTS: u32 = 1;
    pub const RECONNECT_BACKOFF_MS: u64 = 500;
}

/// Service endpoints and model defaults
pub mod endpoints {
    /// OpenAI-compatible REST base URL
    pub const OPENAI_DEFAULT: &str = "https://api.openai.com/v1";

    /// OpenAI realtime WebSocket endpoint
    pub const OPENAI_REALTIME_DEFAULT: &str = "wss://api.openai.com/v1/realtime";

    pub const TRANSCRIPTION_MODEL: &str = "whisper-1";
    pub const CHAT_MODEL: &str = "gpt-4o";
    pub const SPEECH_MODEL: &str = "tts-1";
    pub const REALTIME_MODEL: &str = "gpt-realtime";
    pub const VOICE: &str = "alloy";
}

/// Reasoning defaults
pub mod llm {
    pub const MAX_TOKENS: u32 = 500;
    pub const TEMPERATURE: f32 = 0.7;

    /// Sliding window of retained conversation turns
    pub const HISTORY_MAX_TURNS: usize = 20;

    pub const SYSTEM_PROMPT: &str = "You are a helpful voice assistant on a phone call. \
        Keep every reply short and conversational, one to three sentences, \
        and always answer in the language the caller is speaking.";
}

/// Realtime session server-side turn detection
pub mod realtime {
    /// Server VAD sensitivity
    pub const VAD_THRESHOLD: f32 = 0.5;

    /// Audio kept before detected speech start
    pub const PREFIX_PADDING_MS: u32 = 300;
}

/// Observability
pub mod observability {
    pub const LOG_LEVEL: &str = "info";
    pub const METRICS_PORT: u16 = 9090;
}
