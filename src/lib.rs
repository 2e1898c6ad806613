//! Office NPCs - conversational characters for a small office game
//!
//! This library provides:
//! - Two NPC personas (HR director, CEO) with typed dialogue
//! - Realtime voice conversations through a websocket relay
//! - The relay server itself (Whisper STT, chat completion, TTS)
//! - A headless office floor driving the dialogue from terminal input
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  Foreground (60 Hz)                   │
//! │   Office  │  DialogueController  │  terminal input    │
//! └────────────────────┬─────────────────────────────────┘
//!                      │ VoiceTask (background)
//! ┌────────────────────▼─────────────────────────────────┐
//! │   AudioCapture → RelayClient → Playback               │
//! └────────────────────┬─────────────────────────────────┘
//!                      │ ws://127.0.0.1:8765
//! ┌────────────────────▼─────────────────────────────────┐
//! │                  RelayServer                          │
//! │   sessions  │  STT  │  chat completion  │  TTS        │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod conversation;
pub mod dialogue;
pub mod error;
pub mod llm;
pub mod npc;
pub mod office;
pub mod protocol;
pub mod relay;
pub mod voice;

pub use config::Config;
pub use conversation::{ConversationHistory, MAX_HISTORY_TURNS, Role, Turn};
pub use dialogue::{DialogueCommand, DialogueController, DialogueInput, DialogueState, InputMode};
pub use error::{Error, Result};
pub use llm::{ChatModel, OpenAiChat, SamplingParams};
pub use npc::{NpcRole, Persona};
pub use protocol::{ClientMessage, ServerMessage};
pub use relay::{RelayClient, RelayServer, RelayServices, SessionRegistry};
