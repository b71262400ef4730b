//! Bounded per-call conversation history

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Turns kept per call by default
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Who said a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A caller in the voice channel
    User,
    /// The agent
    Assistant,
}

impl Role {
    /// Label used when rendering history into a prompt
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "You",
        }
    }
}

/// One line of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptTurn {
    /// Speaker role
    pub role: Role,
    /// What was said
    pub text: String,
}

impl TranscriptTurn {
    /// User turn
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    /// Assistant turn
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Most recent turns, oldest first. Appending past the limit drops the oldest.
#[derive(Debug, Clone)]
pub struct History {
    turns: VecDeque<TranscriptTurn>,
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl History {
    /// Create an empty history holding at most `limit` turns (at least one)
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            turns: VecDeque::with_capacity(limit),
            limit,
        }
    }

    /// Append a turn
    pub fn push(&mut self, turn: TranscriptTurn) {
        while self.turns.len() >= self.limit {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Append a user turn
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(TranscriptTurn::user(text));
    }

    /// Append an assistant turn
    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.push(TranscriptTurn::assistant(text));
    }

    /// Turns held
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether nothing has been said yet
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Configured bound
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Turns, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &TranscriptTurn> {
        self.turns.iter()
    }

    /// `User: ...` / `You: ...` lines, oldest first
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|turn| format!("{}: {}", turn.role.label(), turn.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
