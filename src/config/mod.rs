// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load daemon configuration from a file (YAML or JSON).
///
/// PocketBase admin credentials are never stored in the file; they are
/// merged in from `POCKETBASE_ADMIN_EMAIL` / `POCKETBASE_ADMIN_PASSWORD`.
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<DaemonConfig> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .context("Failed to read config file")?;

    let mut config: DaemonConfig = if path.extension().and_then(|s| s.to_str()) == Some("yaml")
        || path.extension().and_then(|s| s.to_str()) == Some("yml")
    {
        serde_yaml::from_str(&contents).context("Failed to parse YAML config")?
    } else {
        serde_json::from_str(&contents).context("Failed to parse JSON config")?
    };

    if let Ok(email) = std::env::var("POCKETBASE_ADMIN_EMAIL") {
        config.pocketbase.admin_email = email;
    }
    if let Ok(password) = std::env::var("POCKETBASE_ADMIN_PASSWORD") {
        config.pocketbase.admin_password = password;
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_yaml_config_with_env_credentials() {
        std::env::set_var("POCKETBASE_ADMIN_EMAIL", "admin@example.com");
        std::env::set_var("POCKETBASE_ADMIN_PASSWORD", "password123");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syncd.yaml");
        std::fs::write(
            &path,
            "pocketbase:\n  url: http://localhost:8090\nvelocity:\n  dir: /srv/velocity\n  service: velocity\n",
        )
        .unwrap();

        let config = load_config(&path).await.unwrap();
        assert_eq!(config.pocketbase.admin_email, "admin@example.com");
        assert_eq!(config.velocity.service, "velocity");
        assert_eq!(config.timeouts.status_interval_secs, 15);
        assert!(!config.metrics.enabled);
    }
}
