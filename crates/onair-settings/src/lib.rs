//! # onair-settings
//!
//! Configuration for the live session bus, loaded in three layers
//! (lowest priority first):
//! 1. **Compiled defaults**: [`OnAirSettings::default()`]
//! 2. **Settings file**: `~/.onair/settings.json` or an explicit path
//! 3. **Environment variables**: `OPENCLAW_*` and `ONAIR_*` overrides
//!
//! [`OnAirSettings::validate`] must succeed before any session is created;
//! a missing completion endpoint or credential is fatal at startup.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
