//! Settings type definitions.
//!
//! Every section is `#[serde(default)]`, so a settings file only needs the
//! keys it wants to change. Field names are camelCase on disk.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnAirSettings {
    pub server: ServerSettings,
    pub bus: BusSettings,
    pub producer: ProducerSettings,
    pub completion: CompletionSettings,
    pub archive: ArchiveSettings,
    pub logging: LoggingSettings,
}

impl OnAirSettings {
    /// Check required values. Called once at startup, before any session
    /// can be created.
    pub fn validate(&self) -> Result<()> {
        if self.completion.base_url.as_deref().map_or(true, str::is_empty) {
            return Err(SettingsError::ConfigurationMissing("OPENCLAW_BASE_URL"));
        }
        if self.completion.token.as_deref().map_or(true, str::is_empty) {
            return Err(SettingsError::ConfigurationMissing("OPENCLAW_TOKEN"));
        }
        if self.completion.model.trim().is_empty() {
            return Err(SettingsError::ConfigurationMissing("OPENCLAW_MODEL"));
        }
        if self.bus.backlog_cap == 0 {
            return Err(SettingsError::InvalidValue("bus.backlogCap must be > 0".into()));
        }
        if self.producer.total_turns == 0 {
            return Err(SettingsError::InvalidValue(
                "producer.totalTurns must be > 0".into(),
            ));
        }
        if self.producer.max_line_chars < 32 {
            return Err(SettingsError::InvalidValue(
                "producer.maxLineChars must be >= 32".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Idle keep-alive interval on viewer streams.
    pub heartbeat_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            heartbeat_secs: 15,
        }
    }
}

impl ServerSettings {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    /// Maximum messages retained per session for replay.
    pub backlog_cap: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self { backlog_cap: 200 }
    }
}

/// Where turn production runs. Exactly one mode is active per process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerMode {
    /// One producer task per session.
    #[default]
    Local,
    /// A single worker services every running session round-robin.
    Worker,
}

impl std::fmt::Display for ProducerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Worker => f.write_str("worker"),
        }
    }
}

impl std::str::FromStr for ProducerMode {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "worker" => Ok(Self::Worker),
            other => Err(format!("unknown producer mode: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProducerSettings {
    pub mode: ProducerMode,
    pub total_turns: u32,
    /// Number of recent messages rendered into each prompt.
    pub context_window: usize,
    pub inter_turn_delay_ms: u64,
    /// Worker mode: pause after each round-robin pass.
    pub pass_delay_ms: u64,
    /// Worker mode: pause when no session is running.
    pub idle_delay_ms: u64,
    pub completion_timeout_ms: u64,
    pub temperature: f64,
    pub max_tokens: u32,
    pub max_line_chars: usize,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            mode: ProducerMode::Local,
            total_turns: 32,
            context_window: 12,
            inter_turn_delay_ms: 750,
            pass_delay_ms: 750,
            idle_delay_ms: 1000,
            completion_timeout_ms: 25_000,
            temperature: 0.9,
            max_tokens: 140,
            max_line_chars: 320,
        }
    }
}

/// Completion endpoint. `base_url` and `token` have no defaults.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionSettings {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub model: String,
    pub request_timeout_ms: u64,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            model: "openai/gpt-4o-mini".to_string(),
            request_timeout_ms: 25_000,
        }
    }
}

impl std::fmt::Debug for CompletionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSettings")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArchiveSettings {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: onair_home().join("database").join("transcripts.db"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Per-target overrides, e.g. `{"onair_llm": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            module_levels: BTreeMap::new(),
        }
    }
}

/// `~/.onair`, falling back to `/tmp/.onair` without a home directory.
pub fn onair_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".onair")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> OnAirSettings {
        let mut s = OnAirSettings::default();
        s.completion.base_url = Some("https://claw.example".into());
        s.completion.token = Some("tok".into());
        s
    }

    #[test]
    fn defaults_match_show_constants() {
        let s = OnAirSettings::default();
        assert_eq!(s.bus.backlog_cap, 200);
        assert_eq!(s.producer.total_turns, 32);
        assert_eq!(s.producer.context_window, 12);
        assert_eq!(s.producer.inter_turn_delay_ms, 750);
        assert_eq!(s.producer.completion_timeout_ms, 25_000);
        assert_eq!(s.producer.max_line_chars, 320);
        assert_eq!(s.server.heartbeat(), Duration::from_secs(15));
        assert_eq!(s.producer.mode, ProducerMode::Local);
    }

    #[test]
    fn validate_requires_base_url_then_token() {
        let mut s = OnAirSettings::default();
        assert!(matches!(
            s.validate(),
            Err(SettingsError::ConfigurationMissing("OPENCLAW_BASE_URL"))
        ));
        s.completion.base_url = Some("https://claw.example".into());
        assert!(matches!(
            s.validate(),
            Err(SettingsError::ConfigurationMissing("OPENCLAW_TOKEN"))
        ));
        s.completion.token = Some(String::new());
        assert!(matches!(
            s.validate(),
            Err(SettingsError::ConfigurationMissing("OPENCLAW_TOKEN"))
        ));
    }

    #[test]
    fn validate_accepts_configured_defaults() {
        assert!(configured().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_backlog() {
        let mut s = configured();
        s.bus.backlog_cap = 0;
        assert!(matches!(s.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: OnAirSettings =
            serde_json::from_str(r#"{"producer": {"mode": "worker", "totalTurns": 4}}"#).unwrap();
        assert_eq!(s.producer.mode, ProducerMode::Worker);
        assert_eq!(s.producer.total_turns, 4);
        assert_eq!(s.producer.context_window, 12);
        assert_eq!(s.server.port, 3000);
    }

    #[test]
    fn debug_redacts_token() {
        let s = configured();
        let dbg = format!("{:?}", s.completion);
        assert!(dbg.contains("[REDACTED]"));
        assert!(!dbg.contains("\"tok\""));
    }

    #[test]
    fn producer_mode_parse() {
        assert_eq!("Worker".parse::<ProducerMode>().unwrap(), ProducerMode::Worker);
        assert_eq!(" local ".parse::<ProducerMode>().unwrap(), ProducerMode::Local);
        assert!("both".parse::<ProducerMode>().is_err());
    }
}
