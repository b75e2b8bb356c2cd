//! Core traits and types for the voice bridge
//!
//! This crate provides foundational types used across all other crates:
//! - Audio frames (16-bit PCM at a declared sample rate) and utterances
//! - Conversation turns and the bounded conversation history
//! - The error taxonomy shared by the audio path and remote backends
//! - Traits for pluggable remote backends (STT, LLM, TTS, realtime sessions)

pub mod audio;
pub mod conversation;
pub mod error;
pub mod traits;

pub use audio::{AudioFrame, SampleRate, Utterance};
pub use conversation::{ConversationHistory, ConversationTurn, TurnRole};
pub use error::{Error, RemoteStage, Result};
pub use traits::{
    ClientEvent, LanguageModel, RealtimeConnector, RealtimeLink, RealtimeSessionConfig,
    ServerEvent, SpeechToText, TextToSpeech,
};
