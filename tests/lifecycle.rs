//! Start, reload and stop against scripted downstreams.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use mcp_aggregator::config::{ConfigStore, ReloadRequest};
use mcp_aggregator::connection::ConnectOutcome;
use mcp_aggregator::lifecycle::{LifecycleController, LifecycleError, LifecycleState, ReloadOutcome};

mod common;
use common::{config_toml, get_json, write_config, ws_entry, Behaviour, ScriptedConnector};

const UNREACHABLE: &str = "ws://127.0.0.1:9";

fn controller(path: &std::path::Path, connector: Arc<ScriptedConnector>) -> LifecycleController {
    LifecycleController::create(ConfigStore::new(path), connector)
        .unwrap()
        .with_grace(Duration::from_millis(500))
}

#[tokio::test]
async fn test_start_mounts_every_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let entries: Vec<String> = ["gamma", "alpha", "beta"]
        .iter()
        .map(|e| ws_entry(e, UNREACHABLE, 1))
        .collect();
    let path = write_config(dir.path(), &config_toml(0, &entries));

    let mut controller = controller(&path, Arc::new(ScriptedConnector::new()));
    let report = controller.start().await.unwrap();

    assert_eq!(report.connected(), 3);
    assert_eq!(controller.state(), LifecycleState::Running);
    assert_eq!(controller.namespaces(), vec!["alpha", "beta", "gamma"]);

    let addr = controller.local_addr().unwrap();
    let (status, body) = get_json(addr, "/namespaces").await;
    assert_eq!(status, 200);
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (status, body) = get_json(addr, "/namespaces/beta").await;
    assert_eq!(status, 200);
    assert_eq!(body["tools"][0]["name"], "beta_echo");

    let (status, _) = get_json(addr, "/namespaces/missing").await;
    assert_eq!(status, 404);

    assert!(controller.stop().await);
}

#[tokio::test]
async fn test_retry_budget_per_downstream() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        &config_toml(
            0,
            &[
                ws_entry("flaky", UNREACHABLE, 3),
                ws_entry("dead", UNREACHABLE, 3),
                ws_entry("steady", UNREACHABLE, 1),
            ],
        ),
    );
    let connector = Arc::new(
        ScriptedConnector::new()
            .with("flaky", Behaviour::FailTimes(1))
            .with("dead", Behaviour::AlwaysFail),
    );

    let mut controller = controller(&path, connector.clone());
    let report = controller.start().await.unwrap();

    assert_eq!(connector.attempts("flaky"), 2);
    assert_eq!(connector.attempts("dead"), 3);
    assert_eq!(report.outcome("dead"), Some(&ConnectOutcome::Failed { attempts: 3 }));
    assert_eq!(controller.namespaces(), vec!["flaky", "steady"]);

    controller.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &config_toml(0, &[ws_entry("a", UNREACHABLE, 1)]));

    let mut controller = controller(&path, Arc::new(ScriptedConnector::new()));
    controller.start().await.unwrap();
    let addr = controller.local_addr().unwrap();

    assert!(controller.stop().await);
    assert!(!controller.stop().await);
    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert!(controller.namespaces().is_empty());

    // Listener released.
    assert!(tokio::net::TcpListener::bind(addr).await.is_ok());
    assert_eq!(controller.reload().await, ReloadOutcome::Skipped);
    assert!(matches!(controller.start().await, Err(LifecycleError::ShuttingDown)));
}

#[tokio::test]
async fn test_reload_replaces_topology() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        &config_toml(0, &[ws_entry("a", UNREACHABLE, 1), ws_entry("b", UNREACHABLE, 1)]),
    );
    let connector = Arc::new(ScriptedConnector::new());
    let mut controller = controller(&path, connector.clone());
    controller.start().await.unwrap();
    let first = controller.topology_id().unwrap();

    write_config(dir.path(), &config_toml(0, &[ws_entry("c", UNREACHABLE, 1)]));
    assert_eq!(controller.reload().await, ReloadOutcome::Applied);

    assert_eq!(controller.namespaces(), vec!["c"]);
    assert_ne!(controller.topology_id(), Some(first));
    assert_eq!(connector.attempts("c"), 1);

    controller.stop().await;
}

#[tokio::test]
async fn test_reload_rejects_invalid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &config_toml(0, &[ws_entry("a", UNREACHABLE, 1)]));
    let mut controller = controller(&path, Arc::new(ScriptedConnector::new()));
    controller.start().await.unwrap();
    let id = controller.topology_id();

    // Network kind without a url.
    write_config(
        dir.path(),
        "[server]\nname = \"x\"\n\n[mcpServers.b]\ntype = \"http\"\nprefix = \"b\"\n",
    );
    assert_eq!(controller.reload().await, ReloadOutcome::Rejected);
    assert_eq!(controller.topology_id(), id);
    assert_eq!(controller.namespaces(), vec!["a"]);

    write_config(dir.path(), "not toml at all [");
    assert_eq!(controller.reload().await, ReloadOutcome::Rejected);
    assert_eq!(controller.namespaces(), vec!["a"]);

    controller.stop().await;
}

#[tokio::test]
async fn test_reload_rolls_back_when_bind_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &config_toml(0, &[ws_entry("a", UNREACHABLE, 1)]));
    let mut controller = controller(&path, Arc::new(ScriptedConnector::new()));
    controller.start().await.unwrap();

    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();
    write_config(dir.path(), &config_toml(port, &[ws_entry("b", UNREACHABLE, 1)]));

    assert_eq!(controller.reload().await, ReloadOutcome::RolledBack);
    assert_eq!(controller.namespaces(), vec!["a"]);
    assert_eq!(controller.state(), LifecycleState::Running);

    let (status, _) = get_json(controller.local_addr().unwrap(), "/health").await;
    assert_eq!(status, 200);

    controller.stop().await;
}

#[tokio::test]
async fn test_start_fails_when_port_taken() {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();

    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &config_toml(port, &[ws_entry("a", UNREACHABLE, 1)]));
    let connector = Arc::new(ScriptedConnector::new());
    let mut controller = controller(&path, connector.clone());

    assert!(matches!(controller.start().await, Err(LifecycleError::Bind { .. })));
    assert_eq!(controller.state(), LifecycleState::Stopped);
    // Nothing is contacted before the listener is bound.
    assert_eq!(connector.attempts("a"), 0);
}

#[tokio::test]
async fn test_create_fails_without_config() {
    let dir = tempfile::tempdir().unwrap();
    let result = LifecycleController::create(
        ConfigStore::new(dir.path().join("absent.toml")),
        Arc::new(ScriptedConnector::new()),
    );
    assert!(matches!(result, Err(LifecycleError::Config(_))));
}

#[tokio::test]
async fn test_run_applies_reloads_until_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &config_toml(0, &[ws_entry("a", UNREACHABLE, 1)]));
    let connector = Arc::new(ScriptedConnector::new());
    let mut controller = controller(&path, connector.clone());
    controller.start().await.unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    let stop = controller.shutdown_handle();
    let dir_path = dir.path().to_path_buf();
    let watched = connector.clone();
    tokio::spawn(async move {
        write_config(&dir_path, &config_toml(0, &[ws_entry("later", UNREACHABLE, 1)]));
        tx.send(ReloadRequest { path: dir_path.join("mcp_config.toml") }).unwrap();
        for _ in 0..100 {
            if watched.attempts("later") > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        stop.request_stop();
    });

    tokio::time::timeout(Duration::from_secs(10), controller.run(rx))
        .await
        .expect("run did not stop");

    assert_eq!(connector.attempts("later"), 1);
    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert!(controller.is_shutting_down());
}

#[tokio::test]
async fn test_stop_interrupts_reload_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), &config_toml(0, &[ws_entry("a", UNREACHABLE, 1)]));
    let connector = Arc::new(ScriptedConnector::new().with("slow", Behaviour::Slow(Duration::from_secs(6))));
    let mut controller = controller(&path, connector.clone());
    controller.start().await.unwrap();

    write_config(
        dir.path(),
        &config_toml(0, &[ws_entry("slow", UNREACHABLE, 3), ws_entry("after", UNREACHABLE, 1)]),
    );
    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(ReloadRequest { path: path.clone() }).unwrap();

    let stop = controller.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        stop.request_stop();
        // A second request while the first is being handled.
        stop.request_stop();
    });

    let began = Instant::now();
    tokio::time::timeout(Duration::from_secs(3), controller.run(rx))
        .await
        .expect("stop waited for the reload");
    assert!(began.elapsed() < Duration::from_secs(2));

    assert_eq!(connector.attempts("slow"), 1);
    assert_eq!(connector.attempts("after"), 0);
    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert!(controller.namespaces().is_empty());
    assert!(!controller.stop().await);
}

#[tokio::test]
async fn test_stop_interrupts_start_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        &config_toml(0, &[ws_entry("slow", UNREACHABLE, 3), ws_entry("after", UNREACHABLE, 1)]),
    );
    let connector = Arc::new(ScriptedConnector::new().with("slow", Behaviour::Slow(Duration::from_secs(6))));
    let mut controller = controller(&path, connector.clone());

    let stop = controller.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        stop.request_stop();
    });

    let result = tokio::time::timeout(Duration::from_secs(2), controller.start())
        .await
        .expect("start ignored the stop request");
    assert!(matches!(result, Err(LifecycleError::ShuttingDown)));
    assert!(controller.is_shutting_down());
    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert_eq!(controller.local_addr(), None);
    assert_eq!(connector.attempts("slow"), 1);
    assert_eq!(connector.attempts("after"), 0);

    assert!(controller.stop().await);
    assert!(!controller.stop().await);
}
