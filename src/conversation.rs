//! Role-tagged conversation history
//!
//! The history always leads with a system prompt. Non-system turns are kept
//! in arrival order and trimmed oldest-first once they exceed the cap.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Maximum number of non-system turns kept in a history
pub const MAX_HISTORY_TURNS: usize = 10;

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single role-tagged message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Conversation history with an immutable-position system prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationHistory {
    system: Turn,
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl ConversationHistory {
    /// Create a history seeded with a system prompt and the default cap
    #[must_use]
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self::with_max_turns(system_prompt, MAX_HISTORY_TURNS)
    }

    /// Create a history with an explicit cap on non-system turns
    #[must_use]
    pub fn with_max_turns(system_prompt: impl Into<String>, max_turns: usize) -> Self {
        Self {
            system: Turn::system(system_prompt),
            turns: VecDeque::new(),
            max_turns,
        }
    }

    /// The leading system prompt
    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system.content
    }

    /// Replace the system prompt, leaving every other turn untouched
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system.content = prompt.into();
    }

    /// Append a non-system turn
    ///
    /// System turns are folded into the prompt slot instead of being queued,
    /// so the leading position can never be displaced.
    pub fn push(&mut self, turn: Turn) {
        if turn.role == Role::System {
            self.system = turn;
        } else {
            self.turns.push_back(turn);
        }
    }

    /// Evict oldest non-system turns until the cap holds
    ///
    /// Returns the number of evicted turns.
    pub fn enforce_cap(&mut self) -> usize {
        let mut evicted = 0;
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            tracing::debug!(evicted, kept = self.turns.len(), "trimmed conversation history");
        }
        evicted
    }

    /// Non-system turns, oldest first
    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    /// Most recent non-system turn
    #[must_use]
    pub fn last(&self) -> Option<&Turn> {
        self.turns.back()
    }

    /// Number of non-system turns
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether no non-system turns have been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Full message list for a completion request, system prompt first
    #[must_use]
    pub fn to_messages(&self) -> Vec<Turn> {
        std::iter::once(self.system.clone())
            .chain(self.turns.iter().cloned())
            .collect()
    }
}
