// src/config/models.rs
use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    pub pocketbase: PocketBaseConfig,
    pub velocity: VelocityConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pocketbase.admin_email.is_empty() || self.pocketbase.admin_password.is_empty() {
            bail!(
                "PocketBase admin credentials missing: set POCKETBASE_ADMIN_EMAIL \
                 and POCKETBASE_ADMIN_PASSWORD"
            );
        }
        if self.velocity.dir.as_os_str().is_empty() {
            bail!("velocity.dir must not be empty");
        }
        if self.velocity.service.is_empty() {
            bail!("velocity.service must not be empty");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PocketBaseConfig {
    pub url: Url,
    #[serde(default)]
    pub admin_email: String,
    #[serde(default)]
    pub admin_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VelocityConfig {
    /// Directory holding velocity.toml, forwarding.secret and the proxy jar.
    pub dir: PathBuf,

    /// systemd unit to restart / query.
    #[serde(default = "default_service")]
    pub service: String,

    /// `user:group` passed to chown after file writes. Empty disables chown.
    #[serde(default)]
    pub owner: String,
}

impl VelocityConfig {
    pub fn config_path(&self) -> PathBuf {
        self.dir.join("velocity.toml")
    }

    pub fn secret_path(&self) -> PathBuf {
        self.dir.join("forwarding.secret")
    }

    pub fn jar_path(&self) -> PathBuf {
        self.dir.join("velocity.jar")
    }

    pub fn jar_backup_path(&self) -> PathBuf {
        self.dir.join("velocity.jar.bak")
    }

    pub fn jar_temp_path(&self) -> PathBuf {
        self.dir.join("velocity.jar.tmp")
    }

    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(".jar-version")
    }
}

fn default_service() -> String {
    "velocity".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Interval between service-status polls.
    pub status_interval_secs: u64,
    /// TCP connect timeout for backend probes.
    pub probe_timeout_secs: u64,
    /// Timeout wrapping systemctl invocations.
    pub command_timeout_secs: u64,
    /// Timeout for the proxy-jar download.
    pub download_timeout_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            status_interval_secs: 15,
            probe_timeout_secs: 2,
            command_timeout_secs: 30,
            download_timeout_secs: 120,
        }
    }
}

impl TimeoutConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9095,
            path: "/metrics".to_string(),
        }
    }
}

/// Convenience constructor for tests: everything rooted in `dir`, no chown.
impl VelocityConfig {
    pub fn for_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            service: default_service(),
            owner: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_missing_credentials() {
        let config = DaemonConfig {
            pocketbase: PocketBaseConfig {
                url: Url::parse("http://localhost:8090").unwrap(),
                admin_email: String::new(),
                admin_password: String::new(),
            },
            velocity: VelocityConfig::for_dir("/srv/velocity"),
            timeouts: TimeoutConfig::default(),
            metrics: MetricsConfig::default(),
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_defaults() {
        let timeouts = TimeoutConfig::default();
        assert_eq!(timeouts.status_interval(), Duration::from_secs(15));
        assert_eq!(timeouts.probe_timeout(), Duration::from_secs(2));
    }
}
