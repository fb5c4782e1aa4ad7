// src/sync/mod.rs
//
// Serialized sync cycles with single-slot coalescing: any number of
// triggers arriving while a cycle is in flight collapse into exactly one
// follow-up cycle.

use crate::artifact;
use crate::config::VelocityConfig;
use crate::materializer;
use crate::metrics::MetricsCollector;
use crate::pocketbase::{PocketBaseClient, ProxySettings, SETTINGS_COLLECTION};
use crate::supervisor::ProcessController;
use anyhow::{Context, Result};
use arc_swap::ArcSwapOption;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use uuid::Uuid;

const MAX_ERROR_LEN: usize = 1000;

fn truncate_error(message: &str) -> String {
    if message.len() <= MAX_ERROR_LEN {
        return message.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

/// Single-slot cycle queue. `request` sets a pending flag; the run loop
/// clears it before each cycle, so triggers during a cycle yield one more
/// run, never N.
pub struct CycleSlot {
    pending: AtomicBool,
    force_restart: AtomicBool,
    notify: Notify,
}

impl CycleSlot {
    pub fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            force_restart: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn request(&self, force_restart: bool) {
        if force_restart {
            self.force_restart.store(true, Ordering::SeqCst);
        }
        self.pending.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Claim the pending request, if any. Returns the accumulated
    /// force-restart flag.
    pub fn take(&self) -> Option<bool> {
        if self.pending.swap(false, Ordering::SeqCst) {
            Some(self.force_restart.swap(false, Ordering::SeqCst))
        } else {
            None
        }
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

impl Default for CycleSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Restart when config or jar changed (true for all change-triggered
    /// and startup cycles).
    pub restart_if_changed: bool,
    /// Restart regardless of diffs (admin touched restart_requested).
    pub force_restart: bool,
}

#[derive(Debug)]
pub struct CycleOutcome {
    pub config_changed: bool,
    pub jar_changed: bool,
    pub restarted: bool,
    pub config_hash: String,
}

pub struct Orchestrator {
    client: Arc<PocketBaseClient>,
    velocity: VelocityConfig,
    controller: Arc<dyn ProcessController>,
    settings: Arc<ArcSwapOption<ProxySettings>>,
    metrics: Arc<MetricsCollector>,
    slot: CycleSlot,
}

impl Orchestrator {
    pub fn new(
        client: Arc<PocketBaseClient>,
        velocity: VelocityConfig,
        controller: Arc<dyn ProcessController>,
        settings: Arc<ArcSwapOption<ProxySettings>>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            client,
            velocity,
            controller,
            settings,
            metrics,
            slot: CycleSlot::new(),
        }
    }

    /// Request a sync cycle. Safe to call from any task; never blocks.
    pub fn trigger(&self, force_restart: bool) {
        self.slot.request(force_restart);
    }

    /// Run loop: waits for triggers and executes cycles one at a time.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = self.slot.wait() => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Sync orchestrator shutting down");
                        break;
                    }
                    continue;
                }
            }

            // Drain: requests arriving mid-cycle run once more afterwards.
            while let Some(force_restart) = self.slot.take() {
                self.run_cycle(SyncOptions {
                    restart_if_changed: true,
                    force_restart,
                })
                .await;
            }
        }
    }

    /// One full cycle. Errors are captured and persisted, never raised;
    /// a failed cycle waits for the next external trigger.
    pub async fn run_cycle(&self, opts: SyncOptions) {
        let cycle_id = Uuid::new_v4();
        let start = Instant::now();
        info!("Sync cycle {cycle_id} starting (force_restart: {})", opts.force_restart);

        match self.execute(opts).await {
            Ok(outcome) => {
                info!(
                    "Sync cycle {cycle_id} done in {:?}: config_changed={} jar_changed={} restarted={}",
                    start.elapsed(),
                    outcome.config_changed,
                    outcome.jar_changed,
                    outcome.restarted
                );
                self.metrics.record_cycle("ok", start.elapsed());
                if outcome.config_changed {
                    self.metrics.record_config_write();
                }
                if outcome.jar_changed {
                    self.metrics.record_jar_swap();
                }
                self.persist_status(None, Some(&outcome.config_hash)).await;
            }
            Err(e) => {
                error!("Sync cycle {cycle_id} failed: {e:#}");
                self.metrics.record_cycle("error", start.elapsed());
                self.persist_status(Some(&format!("{e:#}")), None).await;
            }
        }
    }

    async fn execute(&self, opts: SyncOptions) -> Result<CycleOutcome> {
        let settings = self
            .client
            .fetch_settings()
            .await
            .context("Fetching settings")?;
        let targets = self
            .client
            .fetch_servers()
            .await
            .context("Fetching backend targets")?;
        let forced_hosts = self
            .client
            .fetch_forced_hosts()
            .await
            .context("Fetching forced hosts")?;

        // Snapshot replaced wholesale; concurrent readers keep whichever
        // version they loaded.
        let settings = Arc::new(settings);
        self.settings.store(Some(settings.clone()));

        let rendered = materializer::render(&settings, &targets, &forced_hosts);
        let config_hash = materializer::config_hash(&rendered);

        let mut config_changed = artifact::sync_config(&self.velocity, &rendered).await?;
        let secret = settings.forwarding_secret.clone().unwrap_or_default();
        if artifact::sync_forwarding_secret(&self.velocity, &secret).await? {
            config_changed = true;
        }

        let jar_changed = artifact::sync_jar(&self.velocity, &self.client, &settings).await?;

        let restart = opts.force_restart
            || ((config_changed || jar_changed) && opts.restart_if_changed);
        let mut restarted = false;
        if restart {
            match self.controller.restart().await {
                Ok(()) => {
                    restarted = true;
                    self.metrics.record_restart("ok");
                }
                Err(e) => {
                    // Non-fatal: the next triggering event retries.
                    warn!("Proxy restart failed: {e:#}");
                    self.metrics.record_restart("error");
                }
            }
        }

        Ok(CycleOutcome {
            config_changed,
            jar_changed,
            restarted,
            config_hash,
        })
    }

    /// Persist cycle status to the settings record. Needs a cached record
    /// id; when the very first fetch fails there is nowhere to write, so
    /// the result lives only in the logs.
    async fn persist_status(&self, error_message: Option<&str>, config_hash: Option<&str>) {
        let Some(settings) = self.settings.load_full() else {
            return;
        };

        let mut body = serde_json::json!({
            "sync_status": if error_message.is_some() { "error" } else { "ok" },
            "sync_error": error_message.map(truncate_error).unwrap_or_default(),
            "last_sync": Utc::now().to_rfc3339(),
        });
        if let Some(hash) = config_hash {
            body["config_hash"] = serde_json::Value::String(hash.to_string());
        }

        if let Err(e) = self
            .client
            .update_record(SETTINGS_COLLECTION, &settings.id, &body)
            .await
        {
            warn!("Failed to persist sync status: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_slot_coalesces_triggers() {
        let slot = CycleSlot::new();

        // First trigger claims a cycle.
        slot.request(false);
        assert_eq!(slot.take(), Some(false));

        // Two triggers land while that cycle is "in flight"; they collapse
        // into exactly one follow-up.
        slot.request(false);
        slot.request(false);
        assert_eq!(slot.take(), Some(false));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn test_cycle_slot_accumulates_force_restart() {
        let slot = CycleSlot::new();
        slot.request(false);
        slot.request(true);
        slot.request(false);
        // Any force-restart request during the window survives coalescing.
        assert_eq!(slot.take(), Some(true));
        // And is consumed with it.
        slot.request(false);
        assert_eq!(slot.take(), Some(false));
    }

    #[test]
    fn test_truncate_error_limits_length() {
        let long = "x".repeat(5000);
        assert_eq!(truncate_error(&long).len(), 1000);
        assert_eq!(truncate_error("short"), "short");
    }

    #[test]
    fn test_truncate_error_respects_char_boundaries() {
        let s = "é".repeat(600); // 2 bytes each
        let truncated = truncate_error(&s);
        assert!(truncated.len() <= 1000);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
