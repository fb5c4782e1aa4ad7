// src/materializer/mod.rs
//
// Pure transform: (settings, targets, forced hosts) -> velocity.toml text.
// No I/O here; identical inputs produce byte-identical output.

pub mod defaults;

use crate::pocketbase::{BackendTarget, ForcedHostRoute, ProxySettings};
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// SHA-256 hex digest of rendered config text, persisted to the settings
/// record after each successful cycle.
pub fn config_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Escape a string for embedding in a double-quoted TOML value.
fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// The ordered `try` routing list: default-flagged targets ascending by
/// try-order, else the first defined target, else empty.
fn try_list(targets: &[BackendTarget]) -> Vec<&str> {
    let mut flagged: Vec<&BackendTarget> = targets
        .iter()
        .filter(|t| t.is_default.unwrap_or(false))
        .collect();
    flagged.sort_by_key(|t| t.try_order.unwrap_or(i64::MAX));

    if !flagged.is_empty() {
        flagged.iter().map(|t| t.name.as_str()).collect()
    } else if let Some(first) = targets.first() {
        vec![first.name.as_str()]
    } else {
        Vec::new()
    }
}

fn render_string_list(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("\"{}\"", escape(n))).collect();
    format!("[{}]", quoted.join(", "))
}

pub fn render(
    settings: &ProxySettings,
    targets: &[BackendTarget],
    forced_hosts: &[ForcedHostRoute],
) -> String {
    let mut out = String::with_capacity(2048);

    // Infallible: writing to a String cannot fail.
    let _ = write_config(&mut out, settings, targets, forced_hosts);
    out
}

fn write_config(
    out: &mut String,
    s: &ProxySettings,
    targets: &[BackendTarget],
    forced_hosts: &[ForcedHostRoute],
) -> std::fmt::Result {
    writeln!(out, "# Generated by velocity-syncd. Manual edits are overwritten.")?;
    writeln!(out, "config-version = \"2.7\"")?;
    writeln!(
        out,
        "bind = \"0.0.0.0:{}\"",
        s.bind_port.unwrap_or(defaults::BIND_PORT)
    )?;
    writeln!(
        out,
        "motd = \"{}\"",
        escape(s.motd.as_deref().unwrap_or(defaults::MOTD))
    )?;
    writeln!(
        out,
        "show-max-players = {}",
        s.show_max_players.unwrap_or(defaults::SHOW_MAX_PLAYERS)
    )?;
    writeln!(
        out,
        "online-mode = {}",
        s.online_mode.unwrap_or(defaults::ONLINE_MODE)
    )?;
    writeln!(
        out,
        "force-key-authentication = {}",
        s.force_key_authentication
            .unwrap_or(defaults::FORCE_KEY_AUTHENTICATION)
    )?;
    writeln!(
        out,
        "prevent-client-proxy-connections = {}",
        s.prevent_client_proxy_connections
            .unwrap_or(defaults::PREVENT_CLIENT_PROXY_CONNECTIONS)
    )?;
    writeln!(
        out,
        "player-info-forwarding-mode = \"{}\"",
        s.forwarding_mode
            .unwrap_or(defaults::FORWARDING_MODE)
            .as_config_value()
    )?;
    writeln!(out, "forwarding-secret-file = \"forwarding.secret\"")?;
    writeln!(
        out,
        "announce-forge = {}",
        s.announce_forge.unwrap_or(defaults::ANNOUNCE_FORGE)
    )?;
    writeln!(
        out,
        "kick-existing-players = {}",
        s.kick_existing_players
            .unwrap_or(defaults::KICK_EXISTING_PLAYERS)
    )?;
    writeln!(
        out,
        "ping-passthrough = \"{}\"",
        s.ping_passthrough
            .unwrap_or(defaults::PING_PASSTHROUGH)
            .as_config_value()
    )?;
    writeln!(
        out,
        "enable-player-address-logging = {}",
        s.enable_player_address_logging
            .unwrap_or(defaults::ENABLE_PLAYER_ADDRESS_LOGGING)
    )?;

    writeln!(out)?;
    writeln!(out, "[servers]")?;
    for target in targets {
        writeln!(
            out,
            "{} = \"{}\"",
            quote_key(&target.name),
            escape(&target.address)
        )?;
    }
    writeln!(out, "try = {}", render_string_list(&try_list(targets)))?;

    writeln!(out)?;
    writeln!(out, "[forced-hosts]")?;
    for route in forced_hosts {
        // Resolve referenced record ids to names; drop ids whose target has
        // been deleted, and omit the entry entirely when none resolve.
        let resolved: Vec<&str> = route
            .servers
            .iter()
            .filter_map(|id| targets.iter().find(|t| &t.id == id))
            .map(|t| t.name.as_str())
            .collect();
        if resolved.is_empty() {
            continue;
        }
        writeln!(
            out,
            "\"{}\" = {}",
            escape(&route.hostname),
            render_string_list(&resolved)
        )?;
    }

    writeln!(out)?;
    writeln!(out, "[advanced]")?;
    writeln!(
        out,
        "compression-threshold = {}",
        s.compression_threshold
            .unwrap_or(defaults::COMPRESSION_THRESHOLD)
    )?;
    writeln!(
        out,
        "compression-level = {}",
        s.compression_level.unwrap_or(defaults::COMPRESSION_LEVEL)
    )?;
    writeln!(
        out,
        "login-ratelimit = {}",
        s.login_ratelimit.unwrap_or(defaults::LOGIN_RATELIMIT)
    )?;
    writeln!(
        out,
        "connection-timeout = {}",
        s.connection_timeout.unwrap_or(defaults::CONNECTION_TIMEOUT)
    )?;
    writeln!(
        out,
        "read-timeout = {}",
        s.read_timeout.unwrap_or(defaults::READ_TIMEOUT)
    )?;
    writeln!(
        out,
        "haproxy-protocol = {}",
        s.haproxy_protocol.unwrap_or(defaults::HAPROXY_PROTOCOL)
    )?;
    writeln!(
        out,
        "tcp-fast-open = {}",
        s.tcp_fast_open.unwrap_or(defaults::TCP_FAST_OPEN)
    )?;
    writeln!(
        out,
        "bungee-plugin-message-channel = {}",
        s.bungee_plugin_message_channel
            .unwrap_or(defaults::BUNGEE_PLUGIN_MESSAGE_CHANNEL)
    )?;
    writeln!(
        out,
        "show-ping-requests = {}",
        s.show_ping_requests.unwrap_or(defaults::SHOW_PING_REQUESTS)
    )?;
    writeln!(
        out,
        "failover-on-unexpected-server-disconnect = {}",
        s.failover_on_unexpected_server_disconnect
            .unwrap_or(defaults::FAILOVER_ON_UNEXPECTED_SERVER_DISCONNECT)
    )?;
    writeln!(
        out,
        "announce-proxy-commands = {}",
        s.announce_proxy_commands
            .unwrap_or(defaults::ANNOUNCE_PROXY_COMMANDS)
    )?;
    writeln!(
        out,
        "log-command-executions = {}",
        s.log_command_executions
            .unwrap_or(defaults::LOG_COMMAND_EXECUTIONS)
    )?;
    writeln!(
        out,
        "log-player-connections = {}",
        s.log_player_connections
            .unwrap_or(defaults::LOG_PLAYER_CONNECTIONS)
    )?;
    writeln!(
        out,
        "accepts-transfers = {}",
        s.accepts_transfers.unwrap_or(defaults::ACCEPTS_TRANSFERS)
    )?;

    writeln!(out)?;
    writeln!(out, "[query]")?;
    writeln!(
        out,
        "enabled = {}",
        s.query_enabled.unwrap_or(defaults::QUERY_ENABLED)
    )?;
    writeln!(out, "port = {}", s.query_port.unwrap_or(defaults::QUERY_PORT))?;
    writeln!(
        out,
        "map = \"{}\"",
        escape(s.query_map.as_deref().unwrap_or(defaults::QUERY_MAP))
    )?;
    writeln!(
        out,
        "show-plugins = {}",
        s.query_show_plugins.unwrap_or(defaults::QUERY_SHOW_PLUGINS)
    )?;

    Ok(())
}

// Server names act as TOML keys; quote anything outside the bare-key set.
fn quote_key(name: &str) -> String {
    let bare = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if bare {
        name.to_string()
    } else {
        format!("\"{}\"", escape(name))
    }
}
