// tests/daemon_tests.rs
//
// End-to-end sync cycles against a mocked PocketBase, a temp Velocity
// directory and a fake process controller.

use arc_swap::ArcSwapOption;
use mockito::Matcher;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use velocity_syncd::config::VelocityConfig;
use velocity_syncd::metrics::MetricsRegistry;
use velocity_syncd::pocketbase::PocketBaseClient;
use velocity_syncd::supervisor::testing::FakeController;
use velocity_syncd::sync::{Orchestrator, SyncOptions};

fn test_client(base: &str) -> Arc<PocketBaseClient> {
    Arc::new(
        PocketBaseClient::new(
            Url::parse(base).unwrap(),
            "admin@example.com".to_string(),
            "password123".to_string(),
            Duration::from_secs(5),
        )
        .unwrap(),
    )
}

struct Harness {
    server: mockito::ServerGuard,
    orchestrator: Orchestrator,
    controller: Arc<FakeController>,
    velocity: VelocityConfig,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let velocity = VelocityConfig::for_dir(dir.path());
    let client = test_client(&server.url());
    let controller = Arc::new(FakeController::new());
    let registry = MetricsRegistry::new().unwrap();

    let orchestrator = Orchestrator::new(
        client,
        velocity.clone(),
        controller.clone(),
        Arc::new(ArcSwapOption::empty()),
        registry.collector(),
    );

    Harness {
        server,
        orchestrator,
        controller,
        velocity,
        _dir: dir,
    }
}

fn settings_body() -> &'static str {
    r#"{"items":[{
        "id": "s1",
        "updated": "2026-01-01 10:00:00",
        "bind_port": 25577,
        "motd": "hololive MC",
        "forwarding_secret": "sekrit",
        "forwarding_mode": "modern"
    }]}"#
}

fn servers_body() -> &'static str {
    r#"{"items":[
        {"id":"t1","name":"lobby","address":"10.0.0.2:25565","is_default":true,"try_order":1},
        {"id":"t2","name":"build","address":"10.0.0.3:25565","is_default":false,"try_order":2}
    ]}"#
}

async fn mock_collections(server: &mut mockito::ServerGuard) -> Vec<mockito::Mock> {
    let settings = server
        .mock("GET", "/api/collections/velocity_settings/records")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(settings_body())
        .create_async()
        .await;
    let servers = server
        .mock("GET", "/api/collections/velocity_servers/records")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(servers_body())
        .create_async()
        .await;
    let forced = server
        .mock("GET", "/api/collections/velocity_forced_hosts/records")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"items":[{"id":"f1","hostname":"build.holo.example","servers":["t2"]}]}"#)
        .create_async()
        .await;
    vec![settings, servers, forced]
}

#[tokio::test]
async fn test_first_cycle_writes_everything_and_restarts() {
    let mut h = harness().await;
    let _mocks = mock_collections(&mut h.server).await;
    let status = h
        .server
        .mock("PATCH", "/api/collections/velocity_settings/records/s1")
        .match_body(Matcher::PartialJsonString(r#"{"sync_status":"ok"}"#.to_string()))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    h.orchestrator
        .run_cycle(SyncOptions {
            restart_if_changed: true,
            force_restart: false,
        })
        .await;

    let config = std::fs::read_to_string(h.velocity.config_path()).unwrap();
    assert!(config.contains("bind = \"0.0.0.0:25577\""));
    assert!(config.contains("motd = \"hololive MC\""));
    assert!(config.contains("player-info-forwarding-mode = \"modern\""));
    assert!(config.contains("lobby = \"10.0.0.2:25565\""));
    assert!(config.contains("try = [\"lobby\"]"));
    assert!(config.contains("\"build.holo.example\" = [\"build\"]"));

    let secret = std::fs::read_to_string(h.velocity.secret_path()).unwrap();
    assert_eq!(secret, "sekrit");

    assert_eq!(h.controller.restart_count(), 1);
    status.assert_async().await;
}

#[tokio::test]
async fn test_unchanged_cycle_skips_restart() {
    let mut h = harness().await;
    let _mocks = mock_collections(&mut h.server).await;
    let _status = h
        .server
        .mock("PATCH", "/api/collections/velocity_settings/records/s1")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let opts = SyncOptions {
        restart_if_changed: true,
        force_restart: false,
    };
    h.orchestrator.run_cycle(opts).await;
    assert_eq!(h.controller.restart_count(), 1);

    // Nothing changed on the second pass: no restart.
    h.orchestrator.run_cycle(opts).await;
    assert_eq!(h.controller.restart_count(), 1);
}

#[tokio::test]
async fn test_force_restart_without_changes() {
    let mut h = harness().await;
    let _mocks = mock_collections(&mut h.server).await;
    let _status = h
        .server
        .mock("PATCH", "/api/collections/velocity_settings/records/s1")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    h.orchestrator
        .run_cycle(SyncOptions {
            restart_if_changed: true,
            force_restart: false,
        })
        .await;
    h.orchestrator
        .run_cycle(SyncOptions {
            restart_if_changed: true,
            force_restart: true,
        })
        .await;

    assert_eq!(h.controller.restart_count(), 2);
}

#[tokio::test]
async fn test_fetch_failure_is_reported_not_fatal() {
    let mut h = harness().await;
    let mocks = mock_collections(&mut h.server).await;
    let _status_ok = h
        .server
        .mock("PATCH", "/api/collections/velocity_settings/records/s1")
        .match_body(Matcher::PartialJsonString(r#"{"sync_status":"ok"}"#.to_string()))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let opts = SyncOptions {
        restart_if_changed: true,
        force_restart: false,
    };
    h.orchestrator.run_cycle(opts).await;

    // Break the settings endpoint; the failed cycle must persist an error
    // status against the cached record id and leave the daemon running.
    for mock in mocks {
        mock.remove_async().await;
    }
    let _broken = h
        .server
        .mock("GET", "/api/collections/velocity_settings/records")
        .match_query(Matcher::Any)
        .with_status(500)
        .with_body(r#"{"message":"boom"}"#)
        .create_async()
        .await;
    let status_err = h
        .server
        .mock("PATCH", "/api/collections/velocity_settings/records/s1")
        .match_body(Matcher::PartialJsonString(r#"{"sync_status":"error"}"#.to_string()))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let before = std::fs::read_to_string(h.velocity.config_path()).unwrap();
    h.orchestrator.run_cycle(opts).await;

    status_err.assert_async().await;
    // No partial config written on a failed cycle.
    let after = std::fs::read_to_string(h.velocity.config_path()).unwrap();
    assert_eq!(before, after);
    assert_eq!(h.controller.restart_count(), 1);
}

#[tokio::test]
async fn test_coalesced_triggers_run_exactly_one_followup() {
    let mut h = harness().await;
    // Each cycle fetches settings exactly once, so the fetch count is the
    // cycle count.
    let settings = h
        .server
        .mock("GET", "/api/collections/velocity_settings/records")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_chunked_body(|w| {
            // Hold each cycle open long enough for triggers to land
            // mid-flight.
            std::thread::sleep(Duration::from_millis(300));
            w.write_all(settings_body().as_bytes())
        })
        .expect(2)
        .create_async()
        .await;
    let _servers = h
        .server
        .mock("GET", "/api/collections/velocity_servers/records")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(servers_body())
        .create_async()
        .await;
    let _forced = h
        .server
        .mock("GET", "/api/collections/velocity_forced_hosts/records")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"items":[]}"#)
        .create_async()
        .await;
    let _status = h
        .server
        .mock("PATCH", "/api/collections/velocity_settings/records/s1")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let orchestrator = Arc::new(h.orchestrator);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let run = tokio::spawn(orchestrator.clone().run(shutdown_rx));

    // First trigger starts a cycle; once it is in flight, two more land
    // and must coalesce into a single follow-up.
    orchestrator.trigger(false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    orchestrator.trigger(false);
    orchestrator.trigger(false);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let _ = shutdown_tx.send(true);
    let _ = run.await;

    settings.assert_async().await;
}
