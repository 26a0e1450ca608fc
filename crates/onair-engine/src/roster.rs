//! Who speaks, in what voice, on which show.

use onair_core::messages::Participant;

/// Opening line of every session, appended as idx 0 by the host.
pub const SEED_TEXT: &str = "Mic check. Chamber sealed. Welcome to Claw Radio. (turn 0)";

pub const SHOW_DIRECTIVE: &str =
    "You are generating a live multi-agent radio show. Keep lines short.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Persona {
    pub participant: Participant,
    pub directive: &'static str,
}

/// Rotation order. Turn `t` (1-based) is spoken by `ROSTER[(t - 1) % len]`.
pub const ROSTER: [Persona; 4] = [
    Persona {
        participant: Participant::DjClaw,
        directive: "You are DJ_CLAW, the host. Short, punchy, radio vibe.",
    },
    Persona {
        participant: Participant::AgentB,
        directive: "You are AGENT_B. Co-host. Keep it witty and short.",
    },
    Persona {
        participant: Participant::AgentC,
        directive: "You are AGENT_C. Analyst. Insightful, concise.",
    },
    Persona {
        participant: Participant::AgentD,
        directive: "You are AGENT_D. Chaos. Funny, edgy, short.",
    },
];

pub fn speaker_for_turn(turn: u32) -> &'static Persona {
    let slot = (turn.max(1) - 1) as usize % ROSTER.len();
    &ROSTER[slot]
}

/// Episode metadata rendered into every prompt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpisodeMeta {
    pub title: String,
    pub mood: String,
    pub bpm: u32,
}

impl Default for EpisodeMeta {
    fn default() -> Self {
        Self {
            title: "Claw Radio - Live Agents".to_string(),
            mood: "dark".to_string(),
            bpm: 92,
        }
    }
}
