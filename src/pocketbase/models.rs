// src/pocketbase/models.rs
use serde::Deserialize;

/// Singleton proxy-settings record.
///
/// Tunables are all optional: an absent, null or unparseable value falls back
/// to the documented default at materialization time. Numeric fields accept
/// JSON numbers or numeric strings (admins edit these through free-form UI
/// inputs); boolean fields accept only genuine booleans.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxySettings {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub updated: String,

    #[serde(default, deserialize_with = "lenient::opt_u16")]
    pub bind_port: Option<u16>,
    #[serde(default)]
    pub motd: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub show_max_players: Option<i64>,
    #[serde(default)]
    pub forwarding_secret: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub online_mode: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_forwarding_mode")]
    pub forwarding_mode: Option<ForwardingMode>,
    #[serde(default, deserialize_with = "lenient::opt_ping_passthrough")]
    pub ping_passthrough: Option<PingPassthrough>,

    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub force_key_authentication: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub prevent_client_proxy_connections: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub announce_forge: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub kick_existing_players: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub enable_player_address_logging: Option<bool>,

    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub compression_threshold: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub compression_level: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub login_ratelimit: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub connection_timeout: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub read_timeout: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub haproxy_protocol: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub tcp_fast_open: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub bungee_plugin_message_channel: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub show_ping_requests: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub failover_on_unexpected_server_disconnect: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub announce_proxy_commands: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub log_command_executions: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub log_player_connections: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub accepts_transfers: Option<bool>,

    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub query_enabled: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_u16")]
    pub query_port: Option<u16>,
    #[serde(default)]
    pub query_map: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub query_show_plugins: Option<bool>,

    /// File reference for a replacement proxy jar.
    #[serde(default)]
    pub proxy_jar: Option<String>,
    /// Touched by an administrator to force a restart on the next cycle.
    #[serde(default)]
    pub restart_requested: Option<String>,

    // Daemon-written metadata. Excluded from `content_eq`, so an echo of
    // one of our own status writes compares equal to the cached snapshot.
    #[serde(default)]
    pub sync_status: Option<String>,
    #[serde(default)]
    pub sync_error: Option<String>,
    #[serde(default)]
    pub config_hash: Option<String>,
    #[serde(default)]
    pub proxy_state: Option<String>,
}

impl ProxySettings {
    /// Compare admin-editable content only, ignoring record metadata and
    /// the daemon-written status fields. This is what separates a genuine
    /// edit from the echo event of one of our own status writes.
    pub fn content_eq(&self, other: &Self) -> bool {
        self.bind_port == other.bind_port
            && self.motd == other.motd
            && self.show_max_players == other.show_max_players
            && self.forwarding_secret == other.forwarding_secret
            && self.online_mode == other.online_mode
            && self.forwarding_mode == other.forwarding_mode
            && self.ping_passthrough == other.ping_passthrough
            && self.force_key_authentication == other.force_key_authentication
            && self.prevent_client_proxy_connections == other.prevent_client_proxy_connections
            && self.announce_forge == other.announce_forge
            && self.kick_existing_players == other.kick_existing_players
            && self.enable_player_address_logging == other.enable_player_address_logging
            && self.compression_threshold == other.compression_threshold
            && self.compression_level == other.compression_level
            && self.login_ratelimit == other.login_ratelimit
            && self.connection_timeout == other.connection_timeout
            && self.read_timeout == other.read_timeout
            && self.haproxy_protocol == other.haproxy_protocol
            && self.tcp_fast_open == other.tcp_fast_open
            && self.bungee_plugin_message_channel == other.bungee_plugin_message_channel
            && self.show_ping_requests == other.show_ping_requests
            && self.failover_on_unexpected_server_disconnect
                == other.failover_on_unexpected_server_disconnect
            && self.announce_proxy_commands == other.announce_proxy_commands
            && self.log_command_executions == other.log_command_executions
            && self.log_player_connections == other.log_player_connections
            && self.accepts_transfers == other.accepts_transfers
            && self.query_enabled == other.query_enabled
            && self.query_port == other.query_port
            && self.query_map == other.query_map
            && self.query_show_plugins == other.query_show_plugins
            && self.proxy_jar == other.proxy_jar
            && self.restart_requested == other.restart_requested
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingMode {
    Modern,
    Legacy,
    BungeeGuard,
    None,
}

impl ForwardingMode {
    pub fn as_config_value(self) -> &'static str {
        match self {
            ForwardingMode::Modern => "modern",
            ForwardingMode::Legacy => "legacy",
            ForwardingMode::BungeeGuard => "bungeeguard",
            ForwardingMode::None => "none",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "modern" => Some(ForwardingMode::Modern),
            "legacy" => Some(ForwardingMode::Legacy),
            "bungeeguard" => Some(ForwardingMode::BungeeGuard),
            "none" => Some(ForwardingMode::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingPassthrough {
    Disabled,
    Mods,
    Description,
    All,
}

impl PingPassthrough {
    pub fn as_config_value(self) -> &'static str {
        match self {
            PingPassthrough::Disabled => "DISABLED",
            PingPassthrough::Mods => "MODS",
            PingPassthrough::Description => "DESCRIPTION",
            PingPassthrough::All => "ALL",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "DISABLED" => Some(PingPassthrough::Disabled),
            "MODS" => Some(PingPassthrough::Mods),
            "DESCRIPTION" => Some(PingPassthrough::Description),
            "ALL" => Some(PingPassthrough::All),
            _ => None,
        }
    }
}

/// Backend server record. `name` is the routing key in the generated config.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendTarget {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default, deserialize_with = "lenient::opt_bool")]
    pub is_default: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub try_order: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

impl BackendTarget {
    pub fn is_pending(&self) -> bool {
        self.status.as_deref() == Some("pending")
    }
}

/// Forced-host routing record: hostname -> ordered target record ids.
#[derive(Debug, Clone, Deserialize)]
pub struct ForcedHostRoute {
    #[serde(default)]
    pub id: String,
    pub hostname: String,
    #[serde(default)]
    pub servers: Vec<String>,
}

pub(crate) mod lenient {
    use super::{ForwardingMode, PingPassthrough};
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn value_to_f64(v: &Value) -> Option<f64> {
        match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|f| f.is_finite())
    }

    pub fn opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        let v = Option::<Value>::deserialize(d)?;
        Ok(v.as_ref().and_then(value_to_f64).map(|f| f as i64))
    }

    pub fn opt_u16<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u16>, D::Error> {
        let v = Option::<Value>::deserialize(d)?;
        Ok(v.as_ref()
            .and_then(value_to_f64)
            .filter(|f| (0.0..=f64::from(u16::MAX)).contains(f))
            .map(|f| f as u16))
    }

    // Strict on purpose: a string "true" in a boolean field falls back to
    // the default rather than being guessed at.
    pub fn opt_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        let v = Option::<Value>::deserialize(d)?;
        Ok(match v {
            Some(Value::Bool(b)) => Some(b),
            _ => None,
        })
    }

    pub fn opt_forwarding_mode<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<ForwardingMode>, D::Error> {
        let v = Option::<Value>::deserialize(d)?;
        Ok(match v {
            Some(Value::String(s)) => ForwardingMode::parse(&s),
            _ => None,
        })
    }

    pub fn opt_ping_passthrough<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<PingPassthrough>, D::Error> {
        let v = Option::<Value>::deserialize(d)?;
        Ok(match v {
            Some(Value::String(s)) => PingPassthrough::parse(&s),
            _ => None,
        })
    }
}
