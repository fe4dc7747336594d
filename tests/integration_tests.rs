//! End-to-end lifecycle tests — a real engine, the loopback shutdown channel,
//! and HTTP requests through the running server.

use std::time::{Duration, Instant};

use axum::{Router, extract::Path, routing::get};
use runner_protocol::{ErrorKind, RunOutcome, RunnerError, ServerConfig, ServerState, ShutdownConfig, Url};
use runner_server::{ManagedServer, RouterUnit};
use runner_transport::{ShutdownSignal, TcpShutdownSignal};
use tokio::task::JoinHandle;
use tokio::time::timeout;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn hello_unit() -> RouterUnit {
    RouterUnit::new("hello", Router::new().route("/hello", get(|| async { "hello" })))
}

fn slow_unit() -> RouterUnit {
    RouterUnit::new(
        "slow",
        Router::new().route(
            "/slow/{ms}",
            get(|Path(ms): Path<u64>| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                "done"
            }),
        ),
    )
}

/// Config on an OS-assigned port with the given shutdown port.
fn test_config(base_uri: &str, shutdown_port: Option<u16>) -> ServerConfig {
    ServerConfig::new(base_uri)
        .unwrap()
        .with_shutdown(
            ShutdownConfig::default()
                .with_port(shutdown_port)
                .with_token("integration-test")
                .with_connect_timeout(Duration::from_millis(500))
                .with_stop_timeout(Duration::from_secs(10)),
        )
        .with_grace_period(Duration::from_secs(2))
        .with_ctrl_c(false)
}

fn spawn_start(server: &ManagedServer) -> JoinHandle<Result<RunOutcome, RunnerError>> {
    let server = server.clone();
    tokio::spawn(async move { server.start().await })
}

/// Wait for RUNNING and return the effective base URI.
async fn wait_until_running(server: &ManagedServer) -> Url {
    let mut rx = server.subscribe_state();
    timeout(Duration::from_secs(5), rx.wait_for(|s| s.is_running()))
        .await
        .expect("server did not reach running")
        .expect("state channel closed");
    server.effective_base_uri().expect("running server has an effective URI")
}

async fn join_outcome(runner: JoinHandle<Result<RunOutcome, RunnerError>>, within: Duration) -> RunOutcome {
    timeout(within, runner)
        .await
        .expect("start() did not return in time")
        .expect("start task panicked")
        .expect("start() returned a configuration error")
}

// ─────────────────────────────────────────────────────────────────────────────
// Start / shutdown
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_from_another_task_ends_start_within_grace() {
    let server = ManagedServer::new(test_config("http://127.0.0.1:0/api/", Some(free_port())));
    server.register(hello_unit()).unwrap();

    let runner = spawn_start(&server);
    let base = wait_until_running(&server).await;
    assert_eq!(base.path(), "/api/");

    let body = reqwest::get(format!("{base}hello")).await.unwrap().text().await.unwrap();
    assert_eq!(body, "hello");

    let started = Instant::now();
    server.shutdown().await;
    let outcome = join_outcome(runner, Duration::from_millis(2500)).await;

    assert!(matches!(outcome, RunOutcome::Stopped));
    assert!(started.elapsed() < Duration::from_millis(2500));
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.effective_base_uri().is_none());
}

#[tokio::test]
async fn shutdown_while_stopped_is_a_noop() {
    let server = ManagedServer::new(test_config("http://127.0.0.1:0/", None));

    server.shutdown().await;
    server.shutdown().await;
    assert_eq!(server.state(), ServerState::Stopped);

    // And again after a full cycle.
    let runner = spawn_start(&server);
    wait_until_running(&server).await;
    server.shutdown().await;
    join_outcome(runner, Duration::from_secs(3)).await;
    server.shutdown().await;
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn port_held_by_unrelated_process_fails_without_hanging() {
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = blocker.local_addr().unwrap().port();

    let server = ManagedServer::new(test_config(
        &format!("http://127.0.0.1:{port}/"),
        Some(free_port()),
    ));

    let outcome = timeout(Duration::from_secs(5), server.start())
        .await
        .expect("start() hung on a port conflict")
        .unwrap();

    match outcome {
        RunOutcome::Failed(e) => assert_eq!(e.kind(), ErrorKind::Startup),
        RunOutcome::Stopped => panic!("bind on an occupied port must fail"),
    }
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn registration_after_start_is_rejected_and_not_served() {
    let server = ManagedServer::new(test_config("http://127.0.0.1:0/", None));
    server.register(hello_unit()).unwrap();

    let runner = spawn_start(&server);
    let base = wait_until_running(&server).await;

    let late = RouterUnit::new("late", Router::new().route("/late", get(|| async { "late" })));
    let err = server.register(late).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    assert_eq!(reqwest::get(format!("{base}late")).await.unwrap().status(), 404);
    assert_eq!(reqwest::get(format!("{base}hello")).await.unwrap().status(), 200);
    assert_eq!(server.registered_units(), vec!["hello"]);

    server.shutdown().await;
    join_outcome(runner, Duration::from_secs(3)).await;

    // Stopped again, so registration is open.
    let late = RouterUnit::new("late", Router::new().route("/late", get(|| async { "late" })));
    server.register(late).unwrap();
}

#[tokio::test]
async fn description_document_lists_registered_units() {
    let server = ManagedServer::new(test_config("http://127.0.0.1:0/svc/", None));
    server.register(hello_unit()).unwrap();
    server.register(slow_unit()).unwrap();

    let runner = spawn_start(&server);
    let base = wait_until_running(&server).await;

    let doc: serde_json::Value = reqwest::get(format!("{base}application.wadl"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(doc["units"], serde_json::json!(["hello", "slow"]));

    server.shutdown().await;
    join_outcome(runner, Duration::from_secs(3)).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Remote shutdown of a prior instance
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_instance_stops_the_first_before_binding() {
    let http_port = free_port();
    let shutdown_port = free_port();
    let uri = format!("http://127.0.0.1:{http_port}/");

    let first = ManagedServer::new(test_config(&uri, Some(shutdown_port)));
    first.register(hello_unit()).unwrap();
    let first_runner = spawn_start(&first);
    wait_until_running(&first).await;
    assert_eq!(first.local_addr().unwrap().port(), http_port);

    let second = ManagedServer::new(test_config(&uri, Some(shutdown_port)));
    second.register(hello_unit()).unwrap();
    let second_runner = spawn_start(&second);
    let base = wait_until_running(&second).await;

    // By the time the second instance runs, the first has fully stopped.
    assert_eq!(first.state(), ServerState::Stopped);
    let first_outcome = join_outcome(first_runner, Duration::from_secs(1)).await;
    assert!(matches!(first_outcome, RunOutcome::Stopped));

    assert_eq!(second.local_addr().unwrap().port(), http_port);
    let body = reqwest::get(format!("{base}hello")).await.unwrap().text().await.unwrap();
    assert_eq!(body, "hello");

    second.shutdown().await;
    join_outcome(second_runner, Duration::from_secs(3)).await;
}

#[tokio::test]
async fn shutdown_listener_stops_the_running_instance() {
    let shutdown_port = free_port();
    let config = test_config("http://127.0.0.1:0/", Some(shutdown_port));
    let shutdown = config.shutdown.clone();

    let server = ManagedServer::new(config);
    let runner = spawn_start(&server);
    wait_until_running(&server).await;

    assert!(TcpShutdownSignal.request_shutdown(&shutdown).await);

    let outcome = join_outcome(runner, Duration::from_secs(3)).await;
    assert!(matches!(outcome, RunOutcome::Stopped));
    assert_eq!(server.state(), ServerState::Stopped);
}

// ─────────────────────────────────────────────────────────────────────────────
// Grace period
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn request_finishing_inside_grace_completes() {
    let server = ManagedServer::new(test_config("http://127.0.0.1:0/", None));
    server.register(slow_unit()).unwrap();

    let runner = spawn_start(&server);
    let base = wait_until_running(&server).await;

    let url = format!("{base}slow/400");
    let request = tokio::spawn(async move { reqwest::get(url).await?.text().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.shutdown().await;

    let body = request.await.unwrap().expect("request within grace should succeed");
    assert_eq!(body, "done");
    join_outcome(runner, Duration::from_secs(3)).await;
}

#[tokio::test]
async fn request_outliving_grace_is_severed() {
    let config = test_config("http://127.0.0.1:0/", None).with_grace_period(Duration::from_millis(300));
    let server = ManagedServer::new(config);
    server.register(slow_unit()).unwrap();

    let runner = spawn_start(&server);
    let base = wait_until_running(&server).await;

    let url = format!("{base}slow/10000");
    let request = tokio::spawn(async move { reqwest::get(url).await?.text().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    server.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(3), "shutdown overran: {:?}", started.elapsed());

    let result = timeout(Duration::from_secs(3), request)
        .await
        .expect("client should notice the severed connection")
        .unwrap();
    assert!(result.is_err(), "request outliving the grace period must fail");

    join_outcome(runner, Duration::from_secs(1)).await;
}
