//! Traits for pluggable remote backends
//!
//! The sequential bridge consumes three request/response calls
//! ([`SpeechToText`], [`LanguageModel`], [`TextToSpeech`]); the full-duplex
//! bridge consumes one persistent session opened through a
//! [`RealtimeConnector`].

mod llm;
mod realtime;
mod speech;

pub use llm::LanguageModel;
pub use realtime::{
    ClientEvent, RealtimeConnector, RealtimeLink, RealtimeSessionConfig, ServerEvent,
};
pub use speech::{SpeechToText, TextToSpeech};
