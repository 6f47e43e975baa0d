//! Where settings come from and how the layers combine.
//!
//! A settings file is overlaid key by key onto the serialized defaults, so a
//! file may name only the keys it changes. Nested objects merge, anything
//! else (arrays included) replaces, and an explicit `null` keeps the default.
//! `PERMIT_*` environment variables are applied last.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{PermitSettings, permit_home};

/// Resolve the settings file path: `PERMIT_SETTINGS` or `~/.permit/settings.json`.
pub fn settings_path() -> PathBuf {
    read_env_string("PERMIT_SETTINGS")
        .map(PathBuf::from)
        .unwrap_or_else(|| permit_home().join("settings.json"))
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. An unreadable or malformed file is an
/// error naming the file.
pub fn load_settings_from_path(path: &Path) -> Result<PermitSettings> {
    let malformed = |source| SettingsError::Malformed {
        path: path.to_path_buf(),
        source,
    };
    let defaults = serde_json::to_value(PermitSettings::default()).map_err(malformed)?;

    let merged = match std::fs::read_to_string(path) {
        Ok(content) => {
            debug!(?path, "loading settings from file");
            let overlay: Value = serde_json::from_str(&content).map_err(malformed)?;
            let mut merged = defaults;
            merge_into(&mut merged, overlay);
            merged
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut settings: PermitSettings = serde_json::from_value(merged).map_err(malformed)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Overlay `overlay` onto `base` in place.
pub fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_into(slot, value),
                    None if value.is_null() => {}
                    None => {
                        let _ = base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Out-of-range or unparseable values are logged and ignored.
pub fn apply_env_overrides(settings: &mut PermitSettings) {
    if let Some(v) = read_env_string("PERMIT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_in_range("PERMIT_PORT", 0_u16, u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("PERMIT_DB_PATH") {
        settings.database.path = PathBuf::from(v);
    }
    if let Some(v) = read_env_string("PERMIT_JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }
    if let Some(v) = read_env_string("PERMIT_JWT_ISSUER") {
        settings.auth.jwt_issuer = Some(v);
    }
    if let Some(v) = read_env_string("PERMIT_AUTH_COOKIE") {
        settings.auth.cookie_name = v;
    }
    if let Some(v) = read_env_in_range("PERMIT_WS_QUEUE", 1_usize, 65_536) {
        settings.websocket.send_queue_capacity = v;
    }
    if let Some(v) = read_env_in_range("PERMIT_WS_IDLE_TIMEOUT", 1_u64, 3_600) {
        settings.websocket.idle_timeout_secs = v;
    }
    if let Some(v) = read_env_in_range("PERMIT_WS_PING_INTERVAL", 1_u64, 3_600) {
        settings.websocket.ping_interval_secs = v;
    }
    if let Some(v) = read_env_string("PERMIT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("PERMIT_LOG_FORMAT") {
        settings.logging.format = v;
    }
}

/// Parse `val` and accept it only inside `min..=max`.
pub fn parse_in_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.trim()
        .parse()
        .ok()
        .filter(|n| (min..=max).contains(n))
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_in_range<T>(name: &str, min: T, max: T) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    let val = std::env::var(name).ok()?;
    let parsed = parse_in_range(&val, min, max);
    if parsed.is_none() {
        warn!(key = name, value = %val, "out-of-range or non-numeric env override ignored");
    }
    parsed
}
