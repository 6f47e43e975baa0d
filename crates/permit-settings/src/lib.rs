//! # permit-settings
//!
//! Configuration for the permit realtime daemon.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PermitSettings::default()`]
//! 2. **Settings file**: `~/.permit/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `PERMIT_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings_from_path, merge_into, settings_path};
pub use types::*;
