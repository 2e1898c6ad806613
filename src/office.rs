//! The office floor: player movement, NPC placement, and proximity
//!
//! Stands in for the rendered scene. Positions are `[x, y, z]` with `y` up;
//! only the floor plane matters for distances.

use std::time::{Duration, Instant};

use crate::config::DialogueConfig;
use crate::dialogue::{DialogueCommand, DialogueController};
use crate::npc::NpcRole;

/// Half the room width, less a margin so the player can't clip the walls
pub const ROOM_LIMIT: f32 = 4.5;

/// Distance covered by one movement step
pub const PLAYER_SPEED: f32 = 0.3;

/// How far the player is pushed from an NPC when a conversation ends
pub const RETREAT_DISTANCE: f32 = 3.0;

/// The player's body in the room
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub position: [f32; 3],
    /// Heading in degrees
    pub yaw: f32,
}

impl Default for Player {
    fn default() -> Self {
        Self {
            position: crate::dialogue::DEFAULT_PLAYER_POSITION,
            yaw: 0.0,
        }
    }
}

impl Player {
    /// Step relative to the current heading
    ///
    /// `dx` strafes, `dz` moves forward (negative) or back (positive).
    /// Each axis is blocked independently at the walls.
    pub fn step(&mut self, dx: f32, dz: f32) {
        let angle = (-self.yaw).to_radians();
        let move_x = (dx * angle.cos() + dz * angle.sin()) * PLAYER_SPEED;
        let move_z = (-dx * angle.sin() + dz * angle.cos()) * PLAYER_SPEED;

        let new_x = self.position[0] + move_x;
        let new_z = self.position[2] + move_z;
        if new_x.abs() < ROOM_LIMIT {
            self.position[0] = new_x;
        }
        if new_z.abs() < ROOM_LIMIT {
            self.position[2] = new_z;
        }
    }

    pub fn turn(&mut self, degrees: f32) {
        self.yaw = (self.yaw + degrees).rem_euclid(360.0);
    }
}

/// An NPC standing at a fixed spot
#[derive(Debug, Clone, PartialEq)]
pub struct Npc {
    pub role: NpcRole,
    pub position: [f32; 3],
}

/// Default NPC placements beside their desks
#[must_use]
pub fn default_npcs() -> Vec<Npc> {
    vec![
        Npc {
            role: NpcRole::Hr,
            position: [-3.3, 0.65, -2.0],
        },
        Npc {
            role: NpcRole::Ceo,
            position: [3.3, 0.65, 1.0],
        },
    ]
}

/// Floor-plane distance between two points
#[must_use]
pub fn floor_distance(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dx = a[0] - b[0];
    let dz = a[2] - b[2];
    dx.hypot(dz)
}

/// Room state shared by the foreground loop
#[derive(Debug)]
pub struct Office {
    pub player: Player,
    npcs: Vec<Npc>,
    interaction_distance: f32,
    cooldown: Duration,
    last_interaction: Option<Instant>,
    talking_to: Option<NpcRole>,
}

impl Office {
    #[must_use]
    pub fn new(config: &DialogueConfig) -> Self {
        Self {
            player: Player::default(),
            npcs: default_npcs(),
            interaction_distance: config.interaction_distance,
            cooldown: config.interaction_cooldown,
            last_interaction: None,
            talking_to: None,
        }
    }

    #[must_use]
    pub fn npcs(&self) -> &[Npc] {
        &self.npcs
    }

    /// First NPC within interaction distance of the player
    #[must_use]
    pub fn nearby_npc(&self) -> Option<&Npc> {
        self.npcs
            .iter()
            .find(|npc| floor_distance(self.player.position, npc.position) < self.interaction_distance)
    }

    /// Start a conversation if the player walked up to an NPC
    ///
    /// Checks are skipped while a dialogue is active and for the cooldown
    /// after one starts.
    pub fn check_interactions(&mut self, dialogue: &mut DialogueController, now: Instant) -> Option<NpcRole> {
        if dialogue.is_active() {
            return None;
        }
        if self
            .last_interaction
            .is_some_and(|last| now.saturating_duration_since(last) <= self.cooldown)
        {
            return None;
        }

        let role = self.nearby_npc()?.role;
        dialogue.start_conversation(role, Some(self.player.position));
        self.last_interaction = Some(now);
        self.talking_to = Some(role);
        Some(role)
    }

    /// Carry out a command raised by the dialogue
    pub fn apply(&mut self, command: &DialogueCommand) {
        match command {
            DialogueCommand::MovePlayerBack { position } => {
                self.player.position = *position;
                if let Some(npc) = self.talking_to.take().and_then(|role| self.npc(role)) {
                    let from = npc.position;
                    self.retreat_from(from);
                }
            }
        }
    }

    fn npc(&self, role: NpcRole) -> Option<&Npc> {
        self.npcs.iter().find(|npc| npc.role == role)
    }

    /// Place the player `RETREAT_DISTANCE` from `npc_position`, along the
    /// line from the NPC through the player
    fn retreat_from(&mut self, npc_position: [f32; 3]) {
        let mut dx = self.player.position[0] - npc_position[0];
        let mut dz = self.player.position[2] - npc_position[2];
        let distance = dx.hypot(dz);
        if distance > 0.0 {
            dx /= distance;
            dz /= distance;
        }

        let bound = ROOM_LIMIT - f32::EPSILON;
        self.player.position[0] = (npc_position[0] + dx * RETREAT_DISTANCE).clamp(-bound, bound);
        self.player.position[2] = (npc_position[2] + dz * RETREAT_DISTANCE).clamp(-bound, bound);
    }
}

/// A line of headless input
#[derive(Debug, Clone, PartialEq)]
pub enum OfficeCommand {
    /// One or more `w`/`a`/`s`/`d` steps
    Walk(Vec<(f32, f32)>),
    /// Turn by degrees
    Turn(f32),
    /// Say something to the NPC
    Say(String),
    ToggleVoice,
    /// Shift+Q
    EndConversation,
    /// Print position and surroundings
    Look,
    Quit,
}

/// Parse one input line
///
/// While a dialogue is active, any line that isn't a control word is speech.
#[must_use]
pub fn parse_command(line: &str, in_dialogue: bool) -> Option<OfficeCommand> {
    let trimmed = line.trim();
    match trimmed {
        "" => return None,
        "quit" | ":q" => return Some(OfficeCommand::Quit),
        "Q" => return Some(OfficeCommand::EndConversation),
        "v" | "V" => return Some(OfficeCommand::ToggleVoice),
        "look" => return Some(OfficeCommand::Look),
        _ => {}
    }

    if in_dialogue {
        return Some(OfficeCommand::Say(trimmed.to_string()));
    }

    if let Some(degrees) = trimmed.strip_prefix("turn ") {
        return degrees.trim().parse().ok().map(OfficeCommand::Turn);
    }

    trimmed
        .chars()
        .map(|c| match c.to_ascii_lowercase() {
            'w' => Some((0.0, -1.0)),
            's' => Some((0.0, 1.0)),
            'a' => Some((-1.0, 0.0)),
            'd' => Some((1.0, 0.0)),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()
        .map(OfficeCommand::Walk)
}
