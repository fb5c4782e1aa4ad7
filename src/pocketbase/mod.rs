// src/pocketbase/mod.rs
mod client;
mod models;
mod realtime;

pub use client::PocketBaseClient;
pub use models::{BackendTarget, ForcedHostRoute, ForwardingMode, PingPassthrough, ProxySettings};
pub use realtime::{RealtimeEvent, RealtimeListener, RecordAction};

/// Collection names on the settings source.
pub const SETTINGS_COLLECTION: &str = "velocity_settings";
pub const SERVERS_COLLECTION: &str = "velocity_servers";
pub const FORCED_HOSTS_COLLECTION: &str = "velocity_forced_hosts";
