//! Settings types. Every section deserializes with defaults so a settings
//! file only needs the keys it overrides.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermitSettings {
    /// HTTP bind settings.
    pub server: ServerSettings,
    /// Receipt database location.
    pub database: DatabaseSettings,
    /// Credential verification.
    pub auth: AuthSettings,
    /// Per-connection limits and timers.
    pub websocket: WebSocketSettings,
    /// Connection registry tuning.
    pub hub: HubSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl PermitSettings {
    /// Reject settings the daemon cannot start with.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.auth.jwt_secret.trim().is_empty(), "auth.jwtSecret", "must be set"),
            (self.auth.cookie_name.trim().is_empty(), "auth.cookieName", "must be set"),
            (
                self.websocket.send_queue_capacity == 0,
                "websocket.sendQueueCapacity",
                "must be positive",
            ),
            (
                self.websocket.max_message_bytes == 0,
                "websocket.maxMessageBytes",
                "must be positive",
            ),
            (
                self.websocket.write_timeout_secs == 0,
                "websocket.writeTimeoutSecs",
                "must be positive",
            ),
            (
                self.websocket.ping_interval_secs == 0,
                "websocket.pingIntervalSecs",
                "must be positive",
            ),
            (
                self.websocket.ping_interval_secs >= self.websocket.idle_timeout_secs,
                "websocket.pingIntervalSecs",
                "must be shorter than idleTimeoutSecs",
            ),
            (self.hub.command_capacity == 0, "hub.commandCapacity", "must be positive"),
        ];
        match checks.into_iter().find(|(failed, _, _)| *failed) {
            Some((_, field, reason)) => Err(SettingsError::invalid(field, reason)),
            None => Ok(()),
        }
    }
}

/// HTTP bind settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
        }
    }
}

/// Receipt database location.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Path to the `SQLite` file.
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: permit_home().join("database").join("realtime.db"),
        }
    }
}

/// Credential verification settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Cookie that carries the access token.
    pub cookie_name: String,
    /// HS256 signing secret shared with the token issuer.
    pub jwt_secret: String,
    /// Required `iss` claim, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_issuer: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            cookie_name: "access_token".to_string(),
            jwt_secret: String::new(),
            jwt_issuer: None,
        }
    }
}

/// Per-connection limits and timers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketSettings {
    /// Outbound queue depth before a client is shed.
    pub send_queue_capacity: usize,
    /// Largest inbound frame accepted.
    pub max_message_bytes: usize,
    /// Inbound silence tolerated before the connection is dropped.
    pub idle_timeout_secs: u64,
    /// Keepalive ping cadence.
    pub ping_interval_secs: u64,
    /// Deadline for any single write.
    pub write_timeout_secs: u64,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            send_queue_capacity: 256,
            max_message_bytes: 512 * 1024,
            idle_timeout_secs: 60,
            ping_interval_secs: 30,
            write_timeout_secs: 10,
        }
    }
}

impl WebSocketSettings {
    /// Idle deadline as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Ping cadence as a [`Duration`].
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Write deadline as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Connection registry tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Depth of the hub's control channel.
    pub command_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            command_capacity: 1024,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    /// `"compact"` or `"json"`.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// `~/.permit`, falling back to `/tmp/.permit` without `HOME`.
pub fn permit_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".permit")
}
