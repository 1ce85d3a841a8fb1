use crate::helpers::{memory_hub, wait_event};
use mentions_sync::clock::{self, ClockHandle, PingClock, TimePassed};
use mentions_sync::config::{ClockConfig, ClockMode};
use mentions_sync::{Secret, SyncError, SyncEvent};
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const TOKEN: &str = "clock-secret";

fn ping_config() -> ClockConfig {
    ClockConfig {
        mode: ClockMode::External,
        listen_port: 0,
        ping_token: Some(TOKEN.to_owned()),
        ..ClockConfig::default()
    }
}

async fn start(capacity: usize) -> (PingClock, mpsc::Receiver<TimePassed>) {
    let (tx, rx) = clock::tick_channel(capacity);
    let server = PingClock::start(&ping_config(), tx).await.unwrap();
    (server, rx)
}

async fn ping(server: &PingClock, token: Option<&str>) -> StatusCode {
    let url = format!("http://{}/clock/tick", server.addr());
    let mut request = reqwest::Client::new().post(url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    request.send().await.unwrap().status()
}

#[tokio::test]
async fn authorized_ping_emits_a_tick() {
    let (server, mut rx) = start(8).await;
    let before = chrono::Utc::now();

    assert_eq!(ping(&server, Some(TOKEN)).await, StatusCode::ACCEPTED);
    let tick = rx.recv().await.unwrap();
    assert!(tick.time >= before);
}

#[tokio::test]
async fn missing_or_wrong_token_is_rejected() {
    let (server, mut rx) = start(8).await;

    assert_eq!(ping(&server, None).await, StatusCode::UNAUTHORIZED);
    assert_eq!(ping(&server, Some("clock-secreT")).await, StatusCode::UNAUTHORIZED);
    assert_eq!(ping(&server, Some("short")).await, StatusCode::UNAUTHORIZED);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn health_needs_no_token() {
    let (server, _rx) = start(8).await;
    let response = reqwest::get(format!("http://{}/health", server.addr()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn full_channel_drops_the_tick() {
    let (server, mut rx) = start(1).await;

    assert_eq!(ping(&server, Some(TOKEN)).await, StatusCode::ACCEPTED);
    assert_eq!(ping(&server, Some(TOKEN)).await, StatusCode::TOO_MANY_REQUESTS);
    assert!(rx.recv().await.is_some());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn stopped_consumer_is_reported() {
    let (server, rx) = start(8).await;
    drop(rx);
    assert_eq!(ping(&server, Some(TOKEN)).await, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn refuses_to_start_without_token() {
    let (tx, _rx) = clock::tick_channel(8);
    let config = ClockConfig {
        ping_token: None,
        ..ping_config()
    };
    // Only meaningful when the environment does not supply a token.
    if config.resolved_ping_token().is_none() {
        let err = PingClock::start(&config, tx).await.err().unwrap();
        assert!(matches!(err, SyncError::Config(_)));
    }
}

#[tokio::test]
async fn pings_drive_the_hub() {
    let mut t = memory_hub().await;
    let (tx, rx) = clock::tick_channel(clock::TICK_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let handle = clock::spawn_from_config(&ping_config(), tx, cancel.clone())
        .await
        .unwrap();
    let ClockHandle::Ping(server) = &handle else {
        panic!("external mode starts the ping server");
    };

    let runner = {
        let hub = t.hub.clone();
        tokio::spawn(async move { hub.run(rx).await })
    };
    t.hub.credentials_available("octocat", Secret::new("ghu_1"));
    wait_event(&mut t.events, |e| {
        matches!(e, SyncEvent::SchedulingStarted { .. })
    })
    .await;

    assert_eq!(ping(server, Some(TOKEN)).await, StatusCode::ACCEPTED);
    let completed = wait_event(&mut t.events, |e| {
        matches!(e, SyncEvent::FetchCompleted { .. })
    })
    .await;
    assert_eq!(completed.key(), "octocat");
    assert_eq!(t.mentions.call_count(), 1);

    handle.shutdown();
    assert!(!t.hub.is_shut_down());
    t.hub.shutdown();
    assert!(t.hub.is_shut_down());
    runner.await.unwrap();
}
