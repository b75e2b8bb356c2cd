//! Conversation turns and the bounded history used as reasoning context

use crate::AudioFrame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// The human on the phone
    Caller,
    /// The synthesized voice
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::Caller => "caller",
            TurnRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single turn in the conversation
///
/// Turns are never mutated once appended to a [`ConversationHistory`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Role of the speaker
    pub role: TurnRole,
    /// Transcript, when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Synthesized PCM, only retained when configured
    #[serde(skip)]
    pub audio: Option<AudioFrame>,
    /// When the turn completed
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, text: Option<String>) -> Self {
        Self {
            role,
            text,
            audio: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a caller turn
    pub fn caller(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Caller, Some(text.into()))
    }

    /// Create an assistant turn
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, Some(text.into()))
    }

    /// Attach synthesized audio
    pub fn with_audio(mut self, audio: AudioFrame) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Transcript text, or empty
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

/// Ordered conversation turns with a sliding-window bound
///
/// Appends are monotonic. Once more than `max_turns` turns are held the
/// oldest are evicted; eviction never leaves an assistant turn at the front,
/// so the retained context always opens with something the caller said.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
    evicted: u64,
}

impl ConversationHistory {
    /// `max_turns` of zero is treated as one
    pub fn new(max_turns: usize) -> Self {
        let max_turns = max_turns.max(1);
        Self {
            turns: VecDeque::with_capacity(max_turns + 1),
            max_turns,
            evicted: 0,
        }
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);

        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
            self.evicted += 1;
        }
        while self.turns.len() > 1
            && matches!(self.turns.front(), Some(t) if t.role == TurnRole::Assistant)
        {
            self.turns.pop_front();
            self.evicted += 1;
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// Copy of the retained turns, oldest first
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.back()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Number of turns dropped by the window so far
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
