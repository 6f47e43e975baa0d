//! Runtime configuration derived from [`PermitSettings`].

use std::time::Duration;

use permit_settings::{PermitSettings, WebSocketSettings};

/// Per-connection limits and timers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Outbound queue depth before the client is shed.
    pub send_queue_capacity: usize,
    /// Largest inbound frame accepted.
    pub max_message_bytes: usize,
    /// Inbound silence tolerated before the connection ends.
    pub idle_timeout: Duration,
    /// Keepalive ping cadence.
    pub ping_interval: Duration,
    /// Deadline for a single outbound write.
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&WebSocketSettings::default())
    }
}

impl From<&WebSocketSettings> for ConnectionConfig {
    fn from(ws: &WebSocketSettings) -> Self {
        Self {
            send_queue_capacity: ws.send_queue_capacity,
            max_message_bytes: ws.max_message_bytes,
            idle_timeout: ws.idle_timeout(),
            ping_interval: ws.ping_interval(),
            write_timeout: ws.write_timeout(),
        }
    }
}

/// Server-wide configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Cookie carrying the access token.
    pub cookie_name: String,
    /// Depth of the hub's control channel.
    pub hub_capacity: usize,
    /// Per-connection settings.
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&PermitSettings::default())
    }
}

impl From<&PermitSettings> for ServerConfig {
    fn from(settings: &PermitSettings) -> Self {
        Self {
            cookie_name: settings.auth.cookie_name.clone(),
            hub_capacity: settings.hub.command_capacity,
            connection: ConnectionConfig::from(&settings.websocket),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_settings() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.cookie_name, "access_token");
        assert_eq!(cfg.hub_capacity, 1024);
        assert_eq!(cfg.connection.send_queue_capacity, 256);
        assert_eq!(cfg.connection.max_message_bytes, 512 * 1024);
        assert_eq!(cfg.connection.idle_timeout, Duration::from_secs(60));
        assert_eq!(cfg.connection.ping_interval, Duration::from_secs(30));
        assert_eq!(cfg.connection.write_timeout, Duration::from_secs(10));
    }

    #[test]
    fn settings_overrides_carry_through() {
        let mut settings = PermitSettings::default();
        settings.auth.cookie_name = "sid".into();
        settings.websocket.send_queue_capacity = 8;
        settings.websocket.idle_timeout_secs = 5;
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.cookie_name, "sid");
        assert_eq!(cfg.connection.send_queue_capacity, 8);
        assert_eq!(cfg.connection.idle_timeout, Duration::from_secs(5));
    }
}
