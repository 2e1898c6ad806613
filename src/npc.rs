//! NPC roles and their personas
//!
//! Every role maps to one row of a static table holding the relay prompt,
//! the dialogue prompt, the opening greeting, and the synthesis voice.
//! Adding a character means adding a variant and a row.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Voice used when no NPC role has been announced on a connection
pub const DEFAULT_VOICE: &str = "alloy";

/// Shared framing prepended to every dialogue-mode persona prompt
pub const BASE_PROMPT: &str = "You are an AI character in a 3D office environment.
Maintain consistent personality and remember context within the dialogue.
Keep responses natural and concise (2-3 sentences).
Show emotional intelligence and react appropriately to interactions.
IMPORTANT: Always respond in English only.";

/// Closed set of characters the player can talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NpcRole {
    /// Sarah Chen, HR Director
    #[serde(rename = "HR")]
    Hr,
    /// Michael Chen, CEO
    #[serde(rename = "CEO")]
    Ceo,
}

/// Persona data for one NPC role
#[derive(Debug)]
pub struct Persona {
    pub role: NpcRole,
    pub name: &'static str,
    pub title: &'static str,
    /// Short prompt used by the voice relay
    pub relay_prompt: &'static str,
    /// Character sheet appended to [`BASE_PROMPT`] for typed dialogue
    pub dialogue_prompt: &'static str,
    /// First line spoken when a conversation opens
    pub greeting: &'static str,
    /// Speech synthesis voice id
    pub voice: &'static str,
}

static PERSONAS: [Persona; 2] = [
    Persona {
        role: NpcRole::Hr,
        name: "Sarah Chen",
        title: "HR Director",
        relay_prompt: "You are Sarah Chen, HR Director at Venture Builder AI. Core traits:
- Warm but professional demeanor
- Excellent emotional intelligence
- Strong ethical boundaries
Keep responses concise (2-3 sentences) and natural.",
        dialogue_prompt: "You are Sarah Chen, HR Director at Venture Builder AI.
PERSONALITY: Warm but professional, excellent emotional intelligence, strong ethical boundaries
BACKGROUND: 15 years HR experience in tech, Masters in Organizational Psychology
CURRENT FOCUS: AI Talent Development, Remote Work Framework, Culture Development
SPEAKING STYLE: Supportive and policy-aware, uses phrases like \"I understand that...\" and \"According to our policy...\"
Never start with generic greetings like \"How can I assist you.\" Instead, engage naturally like a real HR director.",
        greeting: "Hi there! I'm Sarah Chen, HR Director here at Venture Builder AI. I was just reviewing our new talent development program - what brings you to my office today?",
        voice: "alloy",
    },
    Persona {
        role: NpcRole::Ceo,
        name: "Michael Chen",
        title: "CEO",
        relay_prompt: "You are Michael Chen, CEO of Venture Builder AI. Core traits:
- Visionary yet approachable
- Strategic thinker
- Passionate about venture building
Keep responses concise (2-3 sentences) and natural.",
        dialogue_prompt: "You are Michael Chen, CEO of Venture Builder AI.
PERSONALITY: Visionary yet approachable, strategic thinker, passionate about innovation
BACKGROUND: Founded company 5 years ago, launched 15+ venture-backed startups, MIT CS graduate
CURRENT FOCUS: AI Venture Studio, European Expansion, Startup Methodology
SPEAKING STYLE: Uses storytelling and data, phrases like \"When we launched...\" and \"Our metrics show...\"
Never start with generic greetings like \"How can I assist you.\" Instead, engage naturally like a real CEO.",
        greeting: "Welcome! I'm Michael Chen, CEO of Venture Builder AI. I was just looking at some exciting metrics from our latest ventures - what's on your mind?",
        voice: "echo",
    },
];

impl NpcRole {
    /// All roles, in table order
    pub const ALL: [Self; 2] = [Self::Hr, Self::Ceo];

    /// Look up the persona row for this role
    #[must_use]
    pub fn persona(self) -> &'static Persona {
        PERSONAS
            .iter()
            .find(|p| p.role == self)
            .unwrap_or(&PERSONAS[0])
    }

    /// Wire tag for this role
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hr => "HR",
            Self::Ceo => "CEO",
        }
    }

    /// Full system prompt for typed dialogue with this NPC
    #[must_use]
    pub fn dialogue_system_prompt(self) -> String {
        format!("{BASE_PROMPT}\n\n{}", self.persona().dialogue_prompt)
    }
}

impl fmt::Display for NpcRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NpcRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HR" => Ok(Self::Hr),
            "CEO" => Ok(Self::Ceo),
            other => Err(Error::Config(format!("unknown NPC role: {other}"))),
        }
    }
}

/// Synthesis voice for a possibly-unannounced role
#[must_use]
pub fn voice_for(role: Option<NpcRole>) -> &'static str {
    role.map_or(DEFAULT_VOICE, |r| r.persona().voice)
}

/// Relay system prompt for a possibly-unannounced role (falls back to HR)
#[must_use]
pub fn relay_prompt_for(role: Option<NpcRole>) -> &'static str {
    role.unwrap_or(NpcRole::Hr).persona().relay_prompt
}
