// src/artifact/mod.rs
//
// On-disk side of a sync cycle: the rendered config file, the
// forwarding-secret file, and the proxy jar swap.

use crate::config::VelocityConfig;
use crate::error::SyncError;
use crate::pocketbase::{PocketBaseClient, ProxySettings, SETTINGS_COLLECTION};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// ZIP/JAR magic number. Only the first two bytes are checked; a truncated
/// body with a valid prefix passes (known weak validation, kept as-is).
const JAR_MAGIC: [u8; 2] = [0x50, 0x4B];

async fn read_if_exists(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// chown the file to the configured owner. Failures are logged, not fatal;
/// an empty owner string disables the call.
async fn chown(owner: &str, path: &Path) {
    if owner.is_empty() {
        return;
    }
    let result = tokio::process::Command::new("chown")
        .arg(owner)
        .arg(path)
        .output()
        .await;
    match result {
        Ok(output) if output.status.success() => {}
        Ok(output) => warn!(
            "chown {} {} failed: {}",
            owner,
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        Err(e) => warn!("chown {} {} failed to spawn: {}", owner, path.display(), e),
    }
}

/// Write the rendered config only when it differs (trimmed comparison) from
/// what is on disk. Returns whether a write happened.
pub async fn sync_config(cfg: &VelocityConfig, rendered: &str) -> Result<bool> {
    let path = cfg.config_path();
    let current = read_if_exists(&path).await?;

    if let Some(current) = &current {
        if current.trim() == rendered.trim() {
            debug!("velocity.toml unchanged");
            return Ok(false);
        }
    }

    tokio::fs::write(&path, rendered)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    chown(&cfg.owner, &path).await;
    info!("Wrote {}", path.display());
    Ok(true)
}

/// Single-line forwarding-secret file, rewritten only on content change,
/// with restrictive permissions.
pub async fn sync_forwarding_secret(cfg: &VelocityConfig, secret: &str) -> Result<bool> {
    let path = cfg.secret_path();
    let current = read_if_exists(&path).await?;

    if current.as_deref().map(str::trim) == Some(secret.trim()) {
        return Ok(false);
    }

    tokio::fs::write(&path, secret)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            .await
            .with_context(|| format!("Failed to chmod {}", path.display()))?;
    }

    chown(&cfg.owner, &path).await;
    info!("Wrote {}", path.display());
    Ok(true)
}

fn version_marker(settings: &ProxySettings, jar_ref: &str) -> String {
    // Uniquely identifies "this exact artifact version is already applied".
    format!("{}:{}:{}", settings.id, jar_ref, settings.updated)
}

/// Move a validated temp file into place, backing up any existing jar and
/// restoring it if the final rename fails.
async fn replace_jar(tmp: &Path, live: &Path, bak: &Path) -> Result<()> {
    let had_previous = tokio::fs::try_exists(live)
        .await
        .with_context(|| format!("Failed to stat {}", live.display()))?;

    if had_previous {
        tokio::fs::rename(live, bak)
            .await
            .with_context(|| format!("Failed to back up {}", live.display()))?;
    }

    match tokio::fs::rename(tmp, live).await {
        Ok(()) => {
            if had_previous {
                if let Err(e) = tokio::fs::remove_file(bak).await {
                    warn!("Failed to remove {}: {}", bak.display(), e);
                }
            }
            Ok(())
        }
        Err(e) => {
            if had_previous {
                if let Err(restore_err) = tokio::fs::rename(bak, live).await {
                    error!(
                        "Failed to restore {} from backup: {}",
                        live.display(),
                        restore_err
                    );
                }
            }
            let _ = tokio::fs::remove_file(tmp).await;
            Err(e).with_context(|| format!("Failed to activate {}", live.display()))
        }
    }
}

/// Download and swap in the replacement proxy jar, if the settings record
/// references one that is not already applied. Returns whether the jar
/// changed. The live jar is never left partial or corrupt.
pub async fn sync_jar(
    cfg: &VelocityConfig,
    pb: &PocketBaseClient,
    settings: &ProxySettings,
) -> Result<bool> {
    let Some(jar_ref) = settings.proxy_jar.as_deref().filter(|s| !s.is_empty()) else {
        return Ok(false);
    };

    let marker = version_marker(settings, jar_ref);
    let marker_path = cfg.marker_path();
    let live = cfg.jar_path();

    let applied = read_if_exists(&marker_path).await?;
    let jar_exists = tokio::fs::try_exists(&live)
        .await
        .with_context(|| format!("Failed to stat {}", live.display()))?;
    if applied.as_deref().map(str::trim) == Some(marker.as_str()) && jar_exists {
        debug!("Proxy jar already at {marker}");
        return Ok(false);
    }

    info!("Downloading proxy jar {jar_ref}");
    let bytes = pb
        .download_file(SETTINGS_COLLECTION, &settings.id, jar_ref)
        .await?;

    if bytes.len() < 2 || bytes[..2] != JAR_MAGIC {
        return Err(SyncError::ArtifactInvalid(format!(
            "{jar_ref} does not start with the ZIP magic number"
        ))
        .into());
    }

    let tmp = cfg.jar_temp_path();
    tokio::fs::write(&tmp, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;

    replace_jar(&tmp, &live, &cfg.jar_backup_path()).await?;
    chown(&cfg.owner, &live).await;

    tokio::fs::write(&marker_path, &marker)
        .await
        .with_context(|| format!("Failed to write {}", marker_path.display()))?;

    info!("Proxy jar replaced ({} bytes, {marker})", bytes.len());
    Ok(true)
}
