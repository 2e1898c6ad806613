//! Dialogue controller integration tests
//!
//! Drive the controller the way the foreground loop does: feed input,
//! then call `update` once per tick.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use office_npcs::config::DialogueConfig;
use office_npcs::dialogue::{
    CONNECTION_APOLOGY, DEFAULT_PLAYER_POSITION, DialogueCommand, DialogueController, DialogueInput,
    DialogueState, InputMode, LANGUAGE_REMINDER, LanguageDetector, VoicePipeline,
};
use office_npcs::npc::{BASE_PROMPT, NpcRole};
use office_npcs::office::Office;
use office_npcs::{MAX_HISTORY_TURNS, Role, SamplingParams, Turn};
use tokio::runtime::Handle;

mod common;
use common::{EchoChat, ScriptedPipeline, UnreachablePipeline};

/// Accepts everything except text containing "bonjour"
struct NoFrench;

impl LanguageDetector for NoFrench {
    fn is_expected(&self, text: &str) -> bool {
        !text.to_lowercase().contains("bonjour")
    }
}

fn controller(chat: Arc<EchoChat>, voice: Arc<dyn VoicePipeline>) -> DialogueController {
    DialogueController::new(chat, Box::new(NoFrench), voice, Handle::current())
}

fn type_line(dialogue: &mut DialogueController, line: &str) {
    for c in line.chars() {
        assert!(dialogue.handle_input(DialogueInput::Char(c)).is_none());
    }
    assert!(dialogue.handle_input(DialogueInput::Submit).is_none());
}

/// Tick until `done` holds, yielding to background tasks in between
async fn settle(dialogue: &mut DialogueController, done: impl Fn(&DialogueController) -> bool) {
    for _ in 0..200 {
        dialogue.update();
        if done(dialogue) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("dialogue did not settle");
}

#[tokio::test]
async fn conversation_opens_with_greeting() {
    let chat = Arc::new(EchoChat::default());
    let mut dialogue = controller(chat, Arc::new(UnreachablePipeline));
    assert_eq!(dialogue.state(), DialogueState::Inactive);

    dialogue.start_conversation(NpcRole::Hr, Some([1.0, 0.5, 2.0]));

    let persona = NpcRole::Hr.persona();
    assert_eq!(dialogue.state(), DialogueState::Active(InputMode::Text));
    assert_eq!(dialogue.npc_message(), persona.greeting);

    let history = dialogue.history().unwrap();
    assert!(history.system_prompt().starts_with(BASE_PROMPT));
    assert!(history.system_prompt().ends_with(persona.dialogue_prompt));
    assert_eq!(history.to_messages()[1], Turn::assistant(persona.greeting));
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn typed_line_gets_a_reply() {
    let chat = Arc::new(EchoChat::default());
    let mut dialogue = controller(chat.clone(), Arc::new(UnreachablePipeline));
    dialogue.start_conversation(NpcRole::Ceo, None);

    type_line(&mut dialogue, "  What is the company vision?  ");
    assert!(dialogue.is_awaiting_reply());
    assert_eq!(dialogue.user_input(), "");

    settle(&mut dialogue, |d| !d.is_awaiting_reply()).await;

    assert_eq!(dialogue.npc_message(), "reply to: What is the company vision?");
    let history = dialogue.history().unwrap();
    let turns: Vec<&Turn> = history.turns().collect();
    assert_eq!(turns.len(), 3);
    assert_eq!(turns[1], &Turn::user("What is the company vision?"));
    assert_eq!(turns[2].role, Role::Assistant);

    let requests = chat.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].1, SamplingParams::DIALOGUE);
    assert_eq!(requests[0].0[0].role, Role::System);
}

#[tokio::test]
async fn backspace_edits_input() {
    let chat = Arc::new(EchoChat::default());
    let mut dialogue = controller(chat, Arc::new(UnreachablePipeline));
    dialogue.start_conversation(NpcRole::Hr, None);

    dialogue.handle_input(DialogueInput::Char('h'));
    dialogue.handle_input(DialogueInput::Char('x'));
    dialogue.handle_input(DialogueInput::Backspace);
    dialogue.handle_input(DialogueInput::Char('i'));
    assert_eq!(dialogue.user_input(), "hi");
}

#[tokio::test]
async fn other_language_gets_reminder_without_api_call() {
    let chat = Arc::new(EchoChat::default());
    let mut dialogue = controller(chat.clone(), Arc::new(UnreachablePipeline));
    dialogue.start_conversation(NpcRole::Hr, None);

    type_line(&mut dialogue, "Bonjour madame");
    dialogue.update();

    assert_eq!(dialogue.npc_message(), LANGUAGE_REMINDER);
    assert!(!dialogue.is_awaiting_reply());
    assert_eq!(chat.calls(), 0);
    assert_eq!(dialogue.history().unwrap().len(), 1);
}

#[tokio::test]
async fn blank_input_is_not_sent() {
    let chat = Arc::new(EchoChat::default());
    let mut dialogue = controller(chat.clone(), Arc::new(UnreachablePipeline));
    dialogue.start_conversation(NpcRole::Hr, None);

    type_line(&mut dialogue, "   ");
    assert!(!dialogue.is_awaiting_reply());
    assert_eq!(chat.calls(), 0);
}

#[tokio::test]
async fn completion_failure_shows_apology() {
    let chat = Arc::new(EchoChat::default());
    chat.fail.store(true, Ordering::SeqCst);
    let mut dialogue = controller(chat, Arc::new(UnreachablePipeline));
    dialogue.start_conversation(NpcRole::Hr, None);

    type_line(&mut dialogue, "Hello there");
    settle(&mut dialogue, |d| !d.is_awaiting_reply()).await;

    assert_eq!(dialogue.npc_message(), CONNECTION_APOLOGY);
    let history = dialogue.history().unwrap();
    assert_eq!(history.last().unwrap(), &Turn::user("Hello there"));
}

#[tokio::test]
async fn repeated_failures_stay_within_history_cap() {
    let chat = Arc::new(EchoChat::default());
    chat.fail.store(true, Ordering::SeqCst);
    let mut dialogue = controller(chat.clone(), Arc::new(UnreachablePipeline));
    dialogue.start_conversation(NpcRole::Ceo, None);

    for n in 0..15 {
        type_line(&mut dialogue, &format!("question {n}"));
        settle(&mut dialogue, |d| !d.is_awaiting_reply()).await;
    }

    let history = dialogue.history().unwrap();
    assert_eq!(history.len(), MAX_HISTORY_TURNS);
    assert_eq!(history.last().unwrap(), &Turn::user("question 14"));
    // System prompt plus the capped turns
    assert!(chat.last_messages().len() <= MAX_HISTORY_TURNS + 1);
}

#[tokio::test]
async fn exit_returns_stored_position() {
    let chat = Arc::new(EchoChat::default());
    let mut dialogue = controller(chat, Arc::new(UnreachablePipeline));

    dialogue.start_conversation(NpcRole::Ceo, Some([2.0, 0.5, 1.5]));
    let command = dialogue.handle_input(DialogueInput::Exit);
    assert_eq!(
        command,
        Some(DialogueCommand::MovePlayerBack {
            position: [2.0, 0.5, 1.5]
        })
    );
    assert!(!dialogue.is_active());
    assert_eq!(dialogue.handle_input(DialogueInput::Char('x')), None);

    dialogue.start_conversation(NpcRole::Hr, None);
    assert_eq!(
        dialogue.exit(),
        DialogueCommand::MovePlayerBack {
            position: DEFAULT_PLAYER_POSITION
        }
    );
}

#[tokio::test]
async fn reply_after_exit_is_discarded() {
    let chat = Arc::new(EchoChat::default());
    let mut dialogue = controller(chat, Arc::new(UnreachablePipeline));
    dialogue.start_conversation(NpcRole::Hr, None);

    type_line(&mut dialogue, "Quick question");
    dialogue.exit();
    dialogue.start_conversation(NpcRole::Ceo, None);
    tokio::time::sleep(Duration::from_millis(10)).await;
    dialogue.update();

    assert_eq!(dialogue.npc_message(), NpcRole::Ceo.persona().greeting);
    assert_eq!(dialogue.history().unwrap().len(), 1);
}

#[tokio::test]
async fn voice_replies_reach_the_npc_message() {
    let chat = Arc::new(EchoChat::default());
    let pipeline = Arc::new(ScriptedPipeline::new(&["Nice to hear your voice."]));
    let mut dialogue = controller(chat, pipeline.clone());
    dialogue.start_conversation(NpcRole::Hr, None);

    dialogue.handle_input(DialogueInput::ToggleVoice);
    assert_eq!(dialogue.state(), DialogueState::Active(InputMode::Voice));

    settle(&mut dialogue, |d| d.npc_message() == "Nice to hear your voice.").await;
    assert_eq!(pipeline.started.load(Ordering::SeqCst), 1);

    // Typing is ignored while speaking
    dialogue.handle_input(DialogueInput::Char('a'));
    assert_eq!(dialogue.user_input(), "");

    dialogue.handle_input(DialogueInput::ToggleVoice);
    assert_eq!(dialogue.state(), DialogueState::Active(InputMode::Text));
    assert_eq!(dialogue.history().unwrap().len(), 1);
}

#[tokio::test]
async fn history_survives_mode_toggles() {
    let chat = Arc::new(EchoChat::default());
    let mut dialogue = controller(chat, Arc::new(ScriptedPipeline::new(&[])));
    dialogue.start_conversation(NpcRole::Ceo, None);

    type_line(&mut dialogue, "Tell me about growth");
    settle(&mut dialogue, |d| !d.is_awaiting_reply()).await;
    let before = dialogue.history().unwrap().clone();

    dialogue.toggle_mode();
    dialogue.toggle_mode();
    assert_eq!(dialogue.history().unwrap(), &before);
}

#[tokio::test]
async fn unreachable_relay_falls_back_to_text() {
    let chat = Arc::new(EchoChat::default());
    let mut dialogue = controller(chat, Arc::new(UnreachablePipeline));
    dialogue.start_conversation(NpcRole::Hr, None);

    dialogue.toggle_mode();
    settle(&mut dialogue, |d| d.state() == DialogueState::Active(InputMode::Text)).await;

    let notice = dialogue.notice().unwrap();
    assert!(notice.contains("timed out"));
    assert!(!dialogue.is_voice_running());
}

#[tokio::test]
async fn walking_up_to_an_npc_starts_a_conversation() {
    let chat = Arc::new(EchoChat::default());
    let mut dialogue = controller(chat, Arc::new(UnreachablePipeline));
    let config = DialogueConfig::default();
    let mut office = Office::new(&config);

    let start = Instant::now();
    assert_eq!(office.check_interactions(&mut dialogue, start), None);

    office.player.position = [-3.3, 0.5, -1.0];
    assert_eq!(office.check_interactions(&mut dialogue, start), Some(NpcRole::Hr));
    assert_eq!(dialogue.current_npc(), Some(NpcRole::Hr));

    // Already talking
    assert_eq!(office.check_interactions(&mut dialogue, start), None);

    let command = dialogue.handle_input(DialogueInput::Exit).unwrap();
    office.apply(&command);
    assert!(office.nearby_npc().is_none());

    // Walk straight back in: the cooldown holds off a restart
    office.player.position = [-3.3, 0.5, -1.0];
    assert_eq!(office.check_interactions(&mut dialogue, start + Duration::from_millis(100)), None);
    assert_eq!(
        office.check_interactions(&mut dialogue, start + config.interaction_cooldown + Duration::from_millis(1)),
        Some(NpcRole::Hr)
    );
}
