// src/materializer/defaults.rs
//
// Documented defaults, mirroring Velocity's stock velocity.toml. Every
// tunable that is absent or unparseable in the settings record renders as
// one of these values.

use crate::pocketbase::{ForwardingMode, PingPassthrough};

pub const BIND_PORT: u16 = 25577;
pub const MOTD: &str = "<#09add3>A Velocity Server";
pub const SHOW_MAX_PLAYERS: i64 = 500;
pub const ONLINE_MODE: bool = true;
pub const FORWARDING_MODE: ForwardingMode = ForwardingMode::None;
pub const PING_PASSTHROUGH: PingPassthrough = PingPassthrough::Disabled;

pub const FORCE_KEY_AUTHENTICATION: bool = true;
pub const PREVENT_CLIENT_PROXY_CONNECTIONS: bool = false;
pub const ANNOUNCE_FORGE: bool = false;
pub const KICK_EXISTING_PLAYERS: bool = false;
pub const ENABLE_PLAYER_ADDRESS_LOGGING: bool = true;

pub const COMPRESSION_THRESHOLD: i64 = 256;
pub const COMPRESSION_LEVEL: i64 = -1;
pub const LOGIN_RATELIMIT: i64 = 3000;
pub const CONNECTION_TIMEOUT: i64 = 5000;
pub const READ_TIMEOUT: i64 = 30000;
pub const HAPROXY_PROTOCOL: bool = false;
pub const TCP_FAST_OPEN: bool = false;
pub const BUNGEE_PLUGIN_MESSAGE_CHANNEL: bool = true;
pub const SHOW_PING_REQUESTS: bool = false;
pub const FAILOVER_ON_UNEXPECTED_SERVER_DISCONNECT: bool = true;
pub const ANNOUNCE_PROXY_COMMANDS: bool = true;
pub const LOG_COMMAND_EXECUTIONS: bool = false;
pub const LOG_PLAYER_CONNECTIONS: bool = true;
pub const ACCEPTS_TRANSFERS: bool = false;

pub const QUERY_ENABLED: bool = false;
pub const QUERY_PORT: u16 = 25577;
pub const QUERY_MAP: &str = "Velocity";
pub const QUERY_SHOW_PLUGINS: bool = false;
