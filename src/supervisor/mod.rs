// src/supervisor/mod.rs
//
// Bridge to the OS service manager: restart the proxy unit and poll its
// run state, reporting both back to the settings record.

use crate::error::SyncError;
use crate::metrics::MetricsCollector;
use crate::pocketbase::{PocketBaseClient, ProxySettings, SETTINGS_COLLECTION};
use anyhow::Result;
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

/// Small seam over the platform's service manager so the orchestrator stays
/// testable with a fake controller.
#[async_trait]
pub trait ProcessController: Send + Sync {
    /// Restart the proxy service. Failures are logged by the caller, never
    /// retried, never fatal.
    async fn restart(&self) -> Result<()>;

    /// Current run state as a short string ("active", "inactive", "failed",
    /// ...), or "error" when the query itself fails unexpectedly.
    async fn status(&self) -> String;
}

pub struct SystemdController {
    unit: String,
    command_timeout: Duration,
}

impl SystemdController {
    pub fn new(unit: String, command_timeout: Duration) -> Self {
        Self {
            unit,
            command_timeout,
        }
    }

    async fn systemctl(&self, args: &[&str]) -> Result<std::process::Output> {
        let output = timeout(
            self.command_timeout,
            tokio::process::Command::new("systemctl").args(args).output(),
        )
        .await
        .map_err(|_| {
            SyncError::ProcessControl(format!("systemctl {} timed out", args.join(" ")))
        })?
        .map_err(|e| SyncError::ProcessControl(format!("systemctl failed to spawn: {e}")))?;
        Ok(output)
    }
}

#[async_trait]
impl ProcessController for SystemdController {
    async fn restart(&self) -> Result<()> {
        let output = self.systemctl(&["restart", &self.unit]).await?;
        if !output.status.success() {
            return Err(SyncError::ProcessControl(format!(
                "systemctl restart {} exited {}: {}",
                self.unit,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .into());
        }
        info!("Restarted {}", self.unit);
        Ok(())
    }

    async fn status(&self) -> String {
        // `is-active` exits non-zero for inactive/failed units but still
        // prints the state; only an empty or unrunnable query maps to
        // "error".
        match self.systemctl(&["is-active", &self.unit]).await {
            Ok(output) => {
                let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if state.is_empty() {
                    "error".to_string()
                } else {
                    state
                }
            }
            Err(e) => {
                warn!("Status query failed: {e:#}");
                "error".to_string()
            }
        }
    }
}

/// Fixed-interval status poller. Runs regardless of sync activity; touches
/// only the status/heartbeat fields of the settings record.
pub struct StatusPoller {
    client: Arc<PocketBaseClient>,
    controller: Arc<dyn ProcessController>,
    settings: Arc<ArcSwapOption<ProxySettings>>,
    metrics: Arc<MetricsCollector>,
    poll_interval: Duration,
}

impl StatusPoller {
    pub fn new(
        client: Arc<PocketBaseClient>,
        controller: Arc<dyn ProcessController>,
        settings: Arc<ArcSwapOption<ProxySettings>>,
        metrics: Arc<MetricsCollector>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            controller,
            settings,
            metrics,
            poll_interval,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: tokio::sync::watch::Receiver<bool>) {
        let mut interval = interval(self.poll_interval);
        let mut last_state: Option<String> = None;

        info!("Starting status poller with interval: {:?}", self.poll_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.poll_once(&mut last_state).await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Status poller shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn poll_once(&self, last_state: &mut Option<String>) {
        let state = self.controller.status().await;

        // Only log transitions, not every 15s tick.
        if last_state.as_deref() != Some(state.as_str()) {
            info!(
                "Proxy state changed: {} -> {}",
                last_state.as_deref().unwrap_or("unknown"),
                state
            );
            *last_state = Some(state.clone());
        } else {
            debug!("Proxy state: {state}");
        }

        self.metrics.set_proxy_up(state == "active");

        // No settings snapshot yet means no record id to write to; the
        // first sync cycle fills this in.
        let Some(settings) = self.settings.load_full() else {
            return;
        };

        let body = serde_json::json!({
            "proxy_state": state,
            "last_heartbeat": Utc::now().to_rfc3339(),
        });
        if let Err(e) = self
            .client
            .update_record(SETTINGS_COLLECTION, &settings.id, &body)
            .await
        {
            warn!("Failed to report proxy state: {e:#}");
        }
    }
}

// Not cfg(test): the integration tests drive the orchestrator with this.
pub mod testing {
    use super::ProcessController;
    use crate::error::SyncError;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory controller for orchestrator tests.
    pub struct FakeController {
        pub restarts: AtomicUsize,
        pub state: std::sync::Mutex<String>,
        pub fail_restart: bool,
    }

    impl FakeController {
        pub fn new() -> Self {
            Self {
                restarts: AtomicUsize::new(0),
                state: std::sync::Mutex::new("active".to_string()),
                fail_restart: false,
            }
        }

        pub fn restart_count(&self) -> usize {
            self.restarts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProcessController for FakeController {
        async fn restart(&self) -> Result<()> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            if self.fail_restart {
                return Err(SyncError::ProcessControl("fake restart failure".into()).into());
            }
            Ok(())
        }

        async fn status(&self) -> String {
            self.state.lock().expect("state lock").clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeController;
    use super::*;

    #[tokio::test]
    async fn test_fake_controller_counts_restarts() {
        let controller = FakeController::new();
        controller.restart().await.unwrap();
        controller.restart().await.unwrap();
        assert_eq!(controller.restart_count(), 2);
        assert_eq!(controller.status().await, "active");
    }

    #[tokio::test]
    async fn test_failed_restart_surfaces_error() {
        let mut controller = FakeController::new();
        controller.fail_restart = true;
        assert!(controller.restart().await.is_err());
    }
}
