//! Per-connection relay sessions and their registry

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::conversation::{ConversationHistory, Turn};
use crate::npc::{NpcRole, relay_prompt_for};

/// Unique identity of one websocket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a connection is in its turn cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Idle, nothing buffered
    Connected,
    /// Receiving chunks for the current utterance
    Accumulating,
    /// Running transcribe, complete, synthesize
    Processing,
}

/// State owned by one connection
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    phase: Phase,
    role: Option<NpcRole>,
    buffer: Vec<f32>,
    history: Option<ConversationHistory>,
}

impl Session {
    #[must_use]
    pub const fn new(id: ConnectionId) -> Self {
        Self {
            id,
            phase: Phase::Connected,
            role: None,
            buffer: Vec::new(),
            history: None,
        }
    }

    /// Append decoded samples, switching role when one is given
    pub fn append_chunk(&mut self, samples: &[f32], role: Option<NpcRole>) {
        if let Some(role) = role {
            if self.role != Some(role) {
                tracing::debug!(connection = %self.id, %role, "session role changed");
            }
            self.role = Some(role);
        }
        self.buffer.extend_from_slice(samples);
        self.phase = Phase::Accumulating;
    }

    /// Take the accumulated utterance and enter processing
    ///
    /// Returns `None` and stays idle when nothing was buffered.
    pub fn take_utterance(&mut self) -> Option<Vec<f32>> {
        if self.buffer.is_empty() {
            self.phase = Phase::Connected;
            return None;
        }
        self.phase = Phase::Processing;
        Some(std::mem::take(&mut self.buffer))
    }

    /// Discard buffered audio; returns the number of dropped samples
    pub fn interrupt(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        if self.phase == Phase::Accumulating {
            self.phase = Phase::Connected;
        }
        dropped
    }

    /// Messages for completing `user_text`, without recording it yet
    ///
    /// Seeds the history on first use and swaps the system prompt when the
    /// role has changed since it was written.
    pub fn prepare_messages(&mut self, user_text: &str) -> Vec<Turn> {
        let prompt = relay_prompt_for(self.role);
        let history = self
            .history
            .get_or_insert_with(|| ConversationHistory::new(prompt));
        if history.system_prompt() != prompt {
            history.set_system_prompt(prompt);
        }

        let mut messages = history.to_messages();
        messages.push(Turn::user(user_text));
        messages
    }

    /// Record a completed exchange and apply the history cap
    pub fn record_exchange(&mut self, user_text: impl Into<String>, reply: impl Into<String>) {
        let prompt = relay_prompt_for(self.role);
        let history = self
            .history
            .get_or_insert_with(|| ConversationHistory::new(prompt));
        history.push(Turn::user(user_text));
        history.push(Turn::assistant(reply));
        history.enforce_cap();
    }

    /// Return to idle after a turn, whatever its outcome
    pub fn finish_turn(&mut self) {
        self.phase = Phase::Connected;
    }

    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub const fn role(&self) -> Option<NpcRole> {
        self.role
    }

    /// Samples waiting for `end_of_audio`
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub const fn history(&self) -> Option<&ConversationHistory> {
        self.history.as_ref()
    }
}

/// Shared handle to one session
pub type SharedSession = Arc<Mutex<Session>>;

/// All live sessions, keyed by connection
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<ConnectionId, SharedSession>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh session for a new connection
    pub async fn open(&self) -> (ConnectionId, SharedSession) {
        let id = ConnectionId::new();
        let session = Arc::new(Mutex::new(Session::new(id)));
        self.sessions.write().await.insert(id, Arc::clone(&session));
        tracing::debug!(connection = %id, "session opened");
        (id, session)
    }

    pub async fn get(&self, id: ConnectionId) -> Option<SharedSession> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Drop a session; returns whether it existed
    pub async fn close(&self, id: ConnectionId) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            tracing::debug!(connection = %id, "session closed");
        }
        removed
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Connection ids currently registered
    pub async fn ids(&self) -> Vec<ConnectionId> {
        self.sessions.read().await.keys().copied().collect()
    }

    /// Copy of a session's history, if it has one
    pub async fn history(&self, id: ConnectionId) -> Option<ConversationHistory> {
        let session = self.get(id).await?;
        let guard = session.lock().await;
        guard.history().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;

    #[test]
    fn chunks_accumulate_and_take_resets() {
        let mut session = Session::new(ConnectionId::new());
        session.append_chunk(&[0.1, 0.2], None);
        session.append_chunk(&[0.3], Some(NpcRole::Ceo));
        assert_eq!(session.phase(), Phase::Accumulating);
        assert_eq!(session.role(), Some(NpcRole::Ceo));

        let samples = session.take_utterance().unwrap();
        assert_eq!(samples, vec![0.1, 0.2, 0.3]);
        assert_eq!(session.phase(), Phase::Processing);
        assert_eq!(session.buffered(), 0);

        session.finish_turn();
        assert_eq!(session.phase(), Phase::Connected);
    }

    #[test]
    fn empty_end_of_audio_is_noop() {
        let mut session = Session::new(ConnectionId::new());
        assert!(session.take_utterance().is_none());
        assert_eq!(session.phase(), Phase::Connected);
        assert!(session.history().is_none());
    }

    #[test]
    fn interrupt_keeps_history() {
        let mut session = Session::new(ConnectionId::new());
        session.record_exchange("hi", "hello");
        session.append_chunk(&[0.5; 4], None);

        assert_eq!(session.interrupt(), 4);
        assert_eq!(session.phase(), Phase::Connected);
        assert_eq!(session.history().unwrap().len(), 2);
    }

    #[test]
    fn prepare_does_not_record() {
        let mut session = Session::new(ConnectionId::new());
        let messages = session.prepare_messages("question");

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1], Turn::user("question"));
        assert!(session.history().unwrap().is_empty());
    }

    #[test]
    fn role_switch_replaces_only_system_prompt() {
        let mut session = Session::new(ConnectionId::new());
        session.append_chunk(&[0.1], Some(NpcRole::Hr));
        session.prepare_messages("first");
        session.record_exchange("first", "hr reply");

        session.append_chunk(&[0.1], Some(NpcRole::Ceo));
        let messages = session.prepare_messages("second");

        assert_eq!(messages[0].content, relay_prompt_for(Some(NpcRole::Ceo)));
        assert_eq!(messages[1], Turn::user("first"));
        assert_eq!(messages[2], Turn::assistant("hr reply"));
    }

    #[test]
    fn history_is_capped() {
        let mut session = Session::new(ConnectionId::new());
        for i in 0..8 {
            session.record_exchange(format!("q{i}"), format!("a{i}"));
        }
        let history = session.history().unwrap();
        assert_eq!(history.len(), 10);
        assert_eq!(history.turns().next().unwrap().content, "q3");
    }

    #[tokio::test]
    async fn registry_open_and_close() {
        let registry = SessionRegistry::new();
        let (a, _) = registry.open().await;
        let (b, _) = registry.open().await;
        assert_ne!(a, b);
        assert_eq!(registry.len().await, 2);

        assert!(registry.close(a).await);
        assert!(!registry.close(a).await);
        assert!(!registry.contains(a).await);
        assert!(registry.contains(b).await);
        assert!(registry.history(b).await.is_none());
    }
}
