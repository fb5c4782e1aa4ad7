// src/main.rs
use anyhow::Result;
use arc_swap::ArcSwapOption;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

mod artifact;
mod config;
mod error;
mod materializer;
mod metrics;
mod pocketbase;
mod prober;
mod supervisor;
mod sync;

use crate::{
    metrics::MetricsRegistry,
    pocketbase::{
        BackendTarget, PocketBaseClient, ProxySettings, RealtimeListener, RecordAction,
        FORCED_HOSTS_COLLECTION, SERVERS_COLLECTION, SETTINGS_COLLECTION,
    },
    prober::Prober,
    supervisor::{StatusPoller, SystemdController},
    sync::Orchestrator,
};

const WATCHED_COLLECTIONS: &[&str] = &[
    SETTINGS_COLLECTION,
    SERVERS_COLLECTION,
    FORCED_HOSTS_COLLECTION,
];

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("velocity_syncd=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "syncd.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path).await?;

    // Initialize metrics
    let metrics_registry = Arc::new(MetricsRegistry::new()?);
    let metrics = metrics_registry.collector();

    // Authenticate against the settings source; a failure here is fatal.
    let client = Arc::new(PocketBaseClient::new(
        config.pocketbase.url.clone(),
        config.pocketbase.admin_email.clone(),
        config.pocketbase.admin_password.clone(),
        config.timeouts.download_timeout(),
    )?);
    client.authenticate().await?;

    // Shared settings snapshot, written by sync cycles, read by the poller.
    let settings = Arc::new(ArcSwapOption::<ProxySettings>::empty());

    let controller = Arc::new(SystemdController::new(
        config.velocity.service.clone(),
        config.timeouts.command_timeout(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Status poller
    let poller = Arc::new(StatusPoller::new(
        client.clone(),
        controller.clone(),
        settings.clone(),
        metrics.clone(),
        config.timeouts.status_interval(),
    ));
    tokio::spawn(poller.run(shutdown_rx.clone()));

    // Metrics server if enabled
    if config.metrics.enabled {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        metrics::serve(metrics_addr, metrics_registry.clone(), config.metrics.path.clone())
            .await?;
    }

    // Sync orchestrator
    let orchestrator = Arc::new(Orchestrator::new(
        client.clone(),
        config.velocity.clone(),
        controller,
        settings.clone(),
        metrics.clone(),
    ));
    tokio::spawn(orchestrator.clone().run(shutdown_rx));

    // Startup cycle brings disk state in line with the store.
    orchestrator.trigger(false);

    let prober = Arc::new(Prober::new(
        client.clone(),
        metrics,
        config.timeouts.probe_timeout(),
    ));

    // Targets already pending at startup were waiting on a probe.
    match client.fetch_servers().await {
        Ok(targets) => {
            for target in targets.into_iter().filter(BackendTarget::is_pending) {
                let prober = prober.clone();
                tokio::spawn(async move { prober.probe_target(&target).await });
            }
        }
        Err(e) => warn!("Startup probe sweep failed: {e:#}"),
    }

    // Seed the last-seen restart request with whatever is already stored,
    // so a stale timestamp from before this run cannot bounce the proxy on
    // the first settings event.
    let last_restart_request = match client.fetch_settings().await {
        Ok(initial) => initial.restart_requested.filter(|ts| !ts.is_empty()),
        Err(e) => {
            warn!("Startup settings fetch failed: {e:#}");
            None
        }
    };

    // Realtime change feed
    tokio::spawn(event_loop(
        client,
        orchestrator,
        prober,
        settings,
        last_restart_request,
    ));

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    info!("velocity-syncd exiting");
    Ok(())
}

/// True when a settings event carries a restart request not yet acted on.
/// Seeded at startup from the stored record so a leftover timestamp from a
/// previous run never counts as new.
fn restart_newly_requested(last: &mut Option<String>, record: &serde_json::Value) -> bool {
    let requested = record["restart_requested"]
        .as_str()
        .filter(|ts| !ts.is_empty())
        .map(str::to_string);
    let force = requested.is_some() && requested != *last;
    if force {
        *last = requested;
    }
    force
}

/// Subscribe to the change feed and dispatch events; reconnects whenever
/// the SSE connection drops.
async fn event_loop(
    client: Arc<PocketBaseClient>,
    orchestrator: Arc<Orchestrator>,
    prober: Arc<Prober>,
    settings: Arc<ArcSwapOption<ProxySettings>>,
    mut last_restart_request: Option<String>,
) {
    loop {
        let mut listener = match RealtimeListener::connect(client.clone(), WATCHED_COLLECTIONS) {
            Ok(listener) => listener,
            Err(e) => {
                warn!("Realtime connect failed: {e:#}");
                tokio::time::sleep(Duration::from_secs(3)).await;
                continue;
            }
        };

        while let Some(event) = listener.next().await {
            let record_id = event.record["id"].as_str().unwrap_or_default();

            match event.collection.as_str() {
                SETTINGS_COLLECTION => {
                    // The status poller writes this record every tick, so
                    // an event is dropped only when it is both recently
                    // self-written and content-identical to the cached
                    // snapshot; an admin edit inside the window still
                    // syncs.
                    let cached = settings.load_full();
                    if client.is_settings_echo(cached.as_deref(), &event.record) {
                        continue;
                    }
                    let force =
                        restart_newly_requested(&mut last_restart_request, &event.record);
                    if force {
                        info!("Restart requested by administrator");
                    }
                    orchestrator.trigger(force);
                }
                SERVERS_COLLECTION => {
                    if client.was_recently_written(record_id) {
                        // Echo of one of our own probe-result writes.
                        continue;
                    }
                    orchestrator.trigger(false);
                    if event.action != RecordAction::Delete {
                        if let Ok(target) =
                            serde_json::from_value::<BackendTarget>(event.record.clone())
                        {
                            if target.is_pending() {
                                let prober = prober.clone();
                                tokio::spawn(async move { prober.probe_target(&target).await });
                            }
                        }
                    }
                }
                FORCED_HOSTS_COLLECTION => {
                    orchestrator.trigger(false);
                }
                _ => {}
            }
        }

        warn!("Realtime connection lost; reconnecting");
        tokio::time::sleep(Duration::from_secs(3)).await;
    }
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::restart_newly_requested;

    #[test]
    fn test_stale_restart_request_seeded_at_startup_does_not_force() {
        // The record still carries the timestamp of a request already
        // honored by a previous run.
        let mut last = Some("2026-05-01 12:00:00".to_string());
        let record =
            serde_json::json!({"id": "s1", "restart_requested": "2026-05-01 12:00:00"});
        assert!(!restart_newly_requested(&mut last, &record));
    }

    #[test]
    fn test_new_restart_request_forces_exactly_once() {
        let mut last = Some("2026-05-01 12:00:00".to_string());
        let record =
            serde_json::json!({"id": "s1", "restart_requested": "2026-08-25 09:30:00"});
        assert!(restart_newly_requested(&mut last, &record));
        // Re-delivery of the same timestamp is not a new request.
        assert!(!restart_newly_requested(&mut last, &record));
    }

    #[test]
    fn test_absent_or_empty_restart_request_never_forces() {
        let mut last = None;
        assert!(!restart_newly_requested(
            &mut last,
            &serde_json::json!({"id": "s1", "restart_requested": ""})
        ));
        assert!(!restart_newly_requested(&mut last, &serde_json::json!({"id": "s1"})));
        assert_eq!(last, None);
    }
}
