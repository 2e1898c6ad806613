//! NPC dialogue: typed and spoken turn-taking

mod controller;
mod language;
mod speech;

pub use controller::{
    CONNECTION_APOLOGY, DEFAULT_PLAYER_POSITION, DialogueCommand, DialogueController, DialogueInput,
    DialogueState, InputMode, LANGUAGE_REMINDER,
};
pub use language::{LanguageDetector, WhatlangDetector};
pub use speech::{RelayVoicePipeline, VoiceEvent, VoicePipeline, VoiceTask};
