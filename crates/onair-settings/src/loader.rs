//! Settings loading: compiled defaults, deep-merged settings file, then
//! environment overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per key)
//! - Arrays and primitives are replaced by the source
//! - Null values in the source are skipped

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{onair_home, OnAirSettings, ProducerMode};

/// Default settings file location (`~/.onair/settings.json`).
pub fn settings_path() -> PathBuf {
    onair_home().join("settings.json")
}

/// Load settings from the default path with env overrides.
pub fn load_settings() -> Result<OnAirSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env overrides. A missing file yields the
/// defaults; a malformed file is an error.
pub fn load_settings_from_path(path: &Path) -> Result<OnAirSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<OnAirSettings> {
    let defaults = serde_json::to_value(OnAirSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides, reading variables through `lookup`.
///
/// Invalid values are ignored with a warning and the file/default value is
/// kept. Empty strings count as unset.
pub fn apply_env_overrides<F>(settings: &mut OnAirSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // Completion endpoint
    if let Some(v) = env.string("OPENCLAW_BASE_URL") {
        settings.completion.base_url = Some(v.trim_end_matches('/').to_string());
    }
    if let Some(v) = env.string("OPENCLAW_TOKEN") {
        settings.completion.token = Some(v);
    }
    if let Some(v) = env.string("OPENCLAW_MODEL") {
        settings.completion.model = v;
    }

    // Server
    if let Some(v) = env.string("ONAIR_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("ONAIR_PORT", |s| parse_range::<u16>(s, 1, u16::MAX)) {
        settings.server.port = v;
    }

    // Bus / producer
    if let Some(v) = env.parsed("ONAIR_BACKLOG_CAP", |s| parse_range::<usize>(s, 1, 100_000)) {
        settings.bus.backlog_cap = v;
    }
    if let Some(v) = env.parsed("ONAIR_PRODUCER_MODE", |s| s.parse::<ProducerMode>().ok()) {
        settings.producer.mode = v;
    }
    if let Some(v) = env.parsed("ONAIR_TOTAL_TURNS", |s| parse_range::<u32>(s, 1, 10_000)) {
        settings.producer.total_turns = v;
    }

    // Archive / logging
    if let Some(v) = env.string("ONAIR_ARCHIVE_PATH") {
        settings.archive.enabled = true;
        settings.archive.path = PathBuf::from(v);
    }
    if let Some(v) = env.parsed("ONAIR_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, key: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let raw = self.string(key)?;
        let result = parse(&raw);
        if result.is_none() {
            tracing::warn!(key, value = %raw, "invalid env var, ignoring");
        }
        result
    }
}

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a number and accept it only within `[min, max]`.
pub fn parse_range<T: std::str::FromStr + PartialOrd>(val: &str, min: T, max: T) -> Option<T> {
    let n: T = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
