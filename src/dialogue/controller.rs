//! Dialogue controller
//!
//! Owns the conversation with whichever NPC the player is facing and
//! switches between typed and spoken turns. Every slow operation runs on a
//! background task; [`DialogueController::update`] collects results once
//! per tick so the foreground loop never blocks.

use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use super::language::LanguageDetector;
use super::speech::{VoiceEvent, VoicePipeline, VoiceTask};
use crate::Result;
use crate::conversation::{ConversationHistory, Turn};
use crate::llm::{ChatModel, SamplingParams};
use crate::npc::NpcRole;

/// Shown instead of calling the model when input is in another language
pub const LANGUAGE_REMINDER: &str = "Please speak in English for this conversation.";

/// Shown when a completion request fails
pub const CONNECTION_APOLOGY: &str = "I apologize, but I'm having trouble connecting to our systems right now.";

/// Player position used when a conversation starts without one
pub const DEFAULT_PLAYER_POSITION: [f32; 3] = [0.0, 0.5, 0.0];

/// How the player is currently talking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Text,
    Voice,
}

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueState {
    Inactive,
    Active(InputMode),
}

/// Input routed to an active dialogue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogueInput {
    /// A printable character typed into the input line
    Char(char),
    Backspace,
    /// Enter
    Submit,
    /// V
    ToggleVoice,
    /// Shift+Q
    Exit,
}

/// Request for the foreground to act on
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DialogueCommand {
    /// Return the player to where they stood before the conversation
    MovePlayerBack { position: [f32; 3] },
}

struct PendingReply {
    generation: u64,
    rx: oneshot::Receiver<Result<String>>,
}

/// Turn-taking between the player and one NPC
pub struct DialogueController {
    chat: Arc<dyn ChatModel>,
    detector: Box<dyn LanguageDetector>,
    voice: Arc<dyn VoicePipeline>,
    runtime: Handle,
    state: DialogueState,
    npc: Option<NpcRole>,
    history: Option<ConversationHistory>,
    npc_message: String,
    user_input: String,
    notice: Option<String>,
    return_position: [f32; 3],
    pending: Option<PendingReply>,
    voice_task: Option<VoiceTask>,
    generation: u64,
}

impl DialogueController {
    #[must_use]
    pub fn new(
        chat: Arc<dyn ChatModel>,
        detector: Box<dyn LanguageDetector>,
        voice: Arc<dyn VoicePipeline>,
        runtime: Handle,
    ) -> Self {
        Self {
            chat,
            detector,
            voice,
            runtime,
            state: DialogueState::Inactive,
            npc: None,
            history: None,
            npc_message: String::new(),
            user_input: String::new(),
            notice: None,
            return_position: DEFAULT_PLAYER_POSITION,
            pending: None,
            voice_task: None,
            generation: 0,
        }
    }

    /// Begin talking to `role`, remembering where the player stood
    pub fn start_conversation(&mut self, role: NpcRole, player_position: Option<[f32; 3]>) {
        self.stop_voice();
        self.generation += 1;
        self.pending = None;

        let persona = role.persona();
        let mut history = ConversationHistory::new(role.dialogue_system_prompt());
        history.push(Turn::assistant(persona.greeting));

        self.history = Some(history);
        self.npc = Some(role);
        self.npc_message = persona.greeting.to_string();
        self.user_input.clear();
        self.notice = None;
        self.return_position = player_position.unwrap_or(DEFAULT_PLAYER_POSITION);
        self.state = DialogueState::Active(InputMode::Text);

        tracing::info!(npc = %role, "conversation started");
    }

    /// Route one input event; returns a command when the foreground must act
    pub fn handle_input(&mut self, input: DialogueInput) -> Option<DialogueCommand> {
        let DialogueState::Active(mode) = self.state else {
            return None;
        };

        match input {
            DialogueInput::Exit => return Some(self.exit()),
            DialogueInput::ToggleVoice => self.toggle_mode(),
            DialogueInput::Char(c) if mode == InputMode::Text && !c.is_control() => self.user_input.push(c),
            DialogueInput::Backspace if mode == InputMode::Text => {
                self.user_input.pop();
            }
            DialogueInput::Submit if mode == InputMode::Text => {
                self.submit();
            }
            _ => {}
        }
        None
    }

    /// Switch between text and voice; history carries over
    pub fn toggle_mode(&mut self) {
        match self.state {
            DialogueState::Inactive => {}
            DialogueState::Active(InputMode::Text) => {
                let Some(role) = self.npc else {
                    return;
                };
                self.voice_task = Some(VoiceTask::spawn(&self.runtime, Arc::clone(&self.voice), role));
                self.state = DialogueState::Active(InputMode::Voice);
                self.notice = Some("Connecting voice...".to_string());
                tracing::info!(npc = %role, "voice mode on");
            }
            DialogueState::Active(InputMode::Voice) => {
                self.stop_voice();
                self.state = DialogueState::Active(InputMode::Text);
                self.notice = None;
                tracing::info!("voice mode off");
            }
        }
    }

    /// Submit the typed line
    ///
    /// Returns true if a completion request was started.
    pub fn submit(&mut self) -> bool {
        if self.state != DialogueState::Active(InputMode::Text) || self.pending.is_some() {
            return false;
        }

        let text = self.user_input.trim().to_string();
        if text.is_empty() {
            return false;
        }
        self.user_input.clear();

        if !self.detector.is_expected(&text) {
            self.npc_message = LANGUAGE_REMINDER.to_string();
            return false;
        }

        let Some(history) = self.history.as_mut() else {
            return false;
        };

        tracing::debug!(chars = text.len(), "player said");
        history.push(Turn::user(text));
        history.enforce_cap();
        let messages = history.to_messages();

        let (tx, rx) = oneshot::channel();
        let chat = Arc::clone(&self.chat);
        self.runtime.spawn(async move {
            let reply = chat.complete(&messages, &SamplingParams::DIALOGUE).await;
            let _ = tx.send(reply);
        });

        self.pending = Some(PendingReply {
            generation: self.generation,
            rx,
        });
        true
    }

    /// End the conversation
    pub fn exit(&mut self) -> DialogueCommand {
        self.stop_voice();
        self.generation += 1;
        self.pending = None;
        self.state = DialogueState::Inactive;
        self.user_input.clear();
        self.notice = None;

        if let Some(npc) = self.npc.take() {
            tracing::info!(%npc, "conversation ended");
        }

        DialogueCommand::MovePlayerBack {
            position: self.return_position,
        }
    }

    /// Collect finished background work; call once per tick
    pub fn update(&mut self) {
        self.poll_completion();
        self.poll_voice();
    }

    fn poll_completion(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };

        let outcome = match pending.rx.try_recv() {
            Ok(outcome) => outcome,
            Err(oneshot::error::TryRecvError::Empty) => return,
            Err(oneshot::error::TryRecvError::Closed) => {
                Err(crate::Error::Llm("completion task ended without a reply".to_string()))
            }
        };
        let generation = pending.generation;
        self.pending = None;

        if generation != self.generation {
            return;
        }

        match outcome {
            Ok(reply) => {
                if let Some(history) = self.history.as_mut() {
                    history.push(Turn::assistant(reply.clone()));
                    history.enforce_cap();
                }
                self.npc_message = reply;
            }
            Err(e) => {
                tracing::warn!(error = %e, "dialogue completion failed");
                self.npc_message = CONNECTION_APOLOGY.to_string();
            }
        }
    }

    fn poll_voice(&mut self) {
        let Some(task) = self.voice_task.as_mut() else {
            return;
        };

        for event in task.poll_events() {
            match event {
                VoiceEvent::Listening => {
                    self.notice = Some("Listening... press V to stop".to_string());
                }
                VoiceEvent::Reply { text } => {
                    self.npc_message = text;
                }
                VoiceEvent::Failed(reason) => {
                    self.voice_task = None;
                    if self.state == DialogueState::Active(InputMode::Voice) {
                        self.state = DialogueState::Active(InputMode::Text);
                    }
                    self.notice = Some(format!("Voice unavailable: {reason}"));
                    return;
                }
                VoiceEvent::Stopped => {
                    self.voice_task = None;
                    if self.state == DialogueState::Active(InputMode::Voice) {
                        self.state = DialogueState::Active(InputMode::Text);
                        self.notice = None;
                    }
                    return;
                }
            }
        }
    }

    fn stop_voice(&mut self) {
        if let Some(task) = self.voice_task.take() {
            task.cancel();
        }
    }

    #[must_use]
    pub const fn state(&self) -> DialogueState {
        self.state
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, DialogueState::Active(_))
    }

    #[must_use]
    pub const fn current_npc(&self) -> Option<NpcRole> {
        self.npc
    }

    /// What the NPC is currently saying
    #[must_use]
    pub fn npc_message(&self) -> &str {
        &self.npc_message
    }

    /// The partially typed line
    #[must_use]
    pub fn user_input(&self) -> &str {
        &self.user_input
    }

    /// Status line for voice mode and errors
    #[must_use]
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    #[must_use]
    pub const fn history(&self) -> Option<&ConversationHistory> {
        self.history.as_ref()
    }

    #[must_use]
    pub const fn is_awaiting_reply(&self) -> bool {
        self.pending.is_some()
    }

    #[must_use]
    pub fn is_voice_running(&self) -> bool {
        self.voice_task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for DialogueController {
    fn drop(&mut self) {
        self.stop_voice();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_back_command_wire_shape() {
        let command = DialogueCommand::MovePlayerBack {
            position: [1.0, 0.5, -2.0],
        };
        let json = serde_json::to_string(&command).unwrap();
        assert_eq!(json, r#"{"command":"move_player_back","position":[1.0,0.5,-2.0]}"#);
    }
}
