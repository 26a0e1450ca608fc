use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Speaker identities that can author a message.
///
/// The first four rotate as on-air personas; `System` is reserved for
/// synthetic notices (failures, diagnostics) and never takes a turn.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Participant {
    DjClaw,
    AgentB,
    AgentC,
    AgentD,
    System,
}

impl Participant {
    /// The host opens every session.
    pub const HOST: Participant = Participant::DjClaw;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DjClaw => "DJ_CLAW",
            Self::AgentB => "AGENT_B",
            Self::AgentC => "AGENT_C",
            Self::AgentD => "AGENT_D",
            Self::System => "SYSTEM",
        }
    }
}

impl std::fmt::Display for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Participant {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DJ_CLAW" => Ok(Self::DjClaw),
            "AGENT_B" => Ok(Self::AgentB),
            "AGENT_C" => Ok(Self::AgentC),
            "AGENT_D" => Ok(Self::AgentD),
            "SYSTEM" => Ok(Self::System),
            other => Err(format!("unknown participant: {other}")),
        }
    }
}

/// One immutable line of a session transcript.
///
/// `idx` is assigned by the message store at append time and increases by
/// exactly one per successful append within a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub session_id: SessionId,
    pub idx: u64,
    pub participant: Participant,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Lifecycle of a session. `Ended` is terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Unstarted,
    Running,
    Ended,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unstarted => write!(f, "unstarted"),
            Self::Running => write!(f, "running"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unstarted" => Ok(Self::Unstarted),
            "running" => Ok(Self::Running),
            "ended" => Ok(Self::Ended),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}
