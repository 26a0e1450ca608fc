use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Layer, Registry};

type FilteredRegistry = Layered<reload::Layer<EnvFilter, Registry>, Registry>;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "onair_llm" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines on stdout; human-readable output otherwise.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: true,
        }
    }
}

impl TelemetryConfig {
    /// Build from textual levels; unparseable levels are skipped.
    pub fn from_levels<'a>(
        level: &str,
        modules: impl IntoIterator<Item = (&'a str, &'a str)>,
        json: bool,
    ) -> Self {
        Self {
            log_level: level.parse().unwrap_or(Level::INFO),
            module_levels: modules
                .into_iter()
                .filter_map(|(m, l)| l.parse().ok().map(|lvl| (m.to_string(), lvl)))
                .collect(),
            json,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("tracing subscriber already initialized: {0}")]
    AlreadyInitialized(String),
    #[error("failed to reload log filter: {0}")]
    Reload(String),
}

/// Keeps the reload handle for the global filter.
pub struct TelemetryGuard {
    base_level: Level,
    level_filter: Arc<RwLock<Vec<(String, Level)>>>,
    handle: reload::Handle<EnvFilter, Registry>,
}

impl TelemetryGuard {
    /// Change the log level for a specific module at runtime.
    pub fn set_module_level(&self, module: &str, level: Level) -> Result<(), TelemetryError> {
        let directive = {
            let mut levels = self.level_filter.write();
            if let Some(entry) = levels.iter_mut().find(|(m, _)| m == module) {
                entry.1 = level;
            } else {
                levels.push((module.to_string(), level));
            }
            filter_directive(self.base_level, &levels)
        };
        self.handle
            .reload(EnvFilter::new(&directive))
            .map_err(|e| TelemetryError::Reload(e.to_string()))
    }

    /// Get current per-module log level overrides.
    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.level_filter.read().clone()
    }
}

/// Render the `EnvFilter` directive for a base level plus overrides.
pub fn filter_directive(base: Level, module_levels: &[(String, Level)]) -> String {
    let mut filter_str = base.to_string().to_lowercase();
    for (module, level) in module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let directive = filter_directive(config.log_level, &config.module_levels);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));
    let (filter_layer, handle) = reload::Layer::new(env_filter);

    let fmt_layer: Box<dyn Layer<FilteredRegistry> + Send + Sync> = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;

    Ok(TelemetryGuard {
        base_level: config.log_level,
        level_filter: Arc::new(RwLock::new(config.module_levels)),
        handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_with_overrides() {
        let directive = filter_directive(
            Level::INFO,
            &[
                ("onair_llm".to_string(), Level::DEBUG),
                ("hyper".to_string(), Level::WARN),
            ],
        );
        assert_eq!(directive, "info,onair_llm=debug,hyper=warn");
    }

    #[test]
    fn from_levels_skips_garbage() {
        let cfg = TelemetryConfig::from_levels(
            "warn",
            [("onair_store", "trace"), ("onair_engine", "loud")],
            false,
        );
        assert_eq!(cfg.log_level, Level::WARN);
        assert_eq!(cfg.module_levels, vec![("onair_store".to_string(), Level::TRACE)]);
        assert!(!cfg.json);
    }

    #[test]
    fn from_levels_defaults_to_info() {
        let cfg = TelemetryConfig::from_levels("chatty", Vec::<(&str, &str)>::new(), true);
        assert_eq!(cfg.log_level, Level::INFO);
    }

    #[test]
    fn init_then_adjust_module_level() {
        let guard = init_telemetry(TelemetryConfig {
            json: false,
            ..Default::default()
        })
        .unwrap();
        guard.set_module_level("onair_store", Level::DEBUG).unwrap();
        guard.set_module_level("onair_store", Level::TRACE).unwrap();
        assert_eq!(
            guard.module_levels(),
            vec![("onair_store".to_string(), Level::TRACE)]
        );

        assert!(matches!(
            init_telemetry(TelemetryConfig::default()),
            Err(TelemetryError::AlreadyInitialized(_))
        ));
    }
}
