use crate::helpers::{memory_hub, wed};
use mentions_sync::collab::FetchFailure;
use mentions_sync::process::FetchRejection;
use mentions_sync::{
    BackoffConfig, BackoffOutcome, ClientKey, FetchDecision, MentionsClient, Secret,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn backoff(limit: Duration) -> BackoffConfig {
    BackoffConfig::builder()
        .min_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(50))
        .growth_factor(2.0)
        .time_limit(limit)
        .build()
        .unwrap()
}

#[tokio::test]
async fn waits_for_a_slow_fetch_to_succeed() {
    let t = memory_hub().await;
    t.mentions.hold_fetches();
    t.hub.credentials_available("octocat", Secret::new("ghu_1"));
    let client = MentionsClient::new(t.hub.clone(), backoff(Duration::from_secs(5)));

    let done = Arc::new(AtomicBool::new(false));
    let pending = {
        let done = Arc::clone(&done);
        client
            .start_refresh("octocat", move || done.store(true, Ordering::SeqCst))
            .await
            .unwrap()
    };
    assert_eq!(pending.client(), &ClientKey::from_username("octocat"));
    assert!(matches!(pending.decision(), FetchDecision::Started { .. }));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!done.load(Ordering::SeqCst));
    t.mentions.release(1);

    let report = pending.wait().await;
    assert_eq!(report.outcome, BackoffOutcome::Succeeded);
    assert!(report.attempts > 1);
    assert!(done.load(Ordering::SeqCst));
}

#[tokio::test]
async fn remote_failure_is_rejected() {
    let t = memory_hub().await;
    t.mentions.push_failure(FetchFailure::transport("connection reset"));
    t.hub.credentials_available("octocat", Secret::new("ghu_1"));
    let client = MentionsClient::new(t.hub.clone(), backoff(Duration::from_secs(5)));

    let report = client.refresh_and_wait("octocat").await.unwrap();
    assert_eq!(report.outcome, BackoffOutcome::Rejected);
}

#[tokio::test]
async fn unknown_user_is_rejected_at_once() {
    let t = memory_hub().await;
    let client = MentionsClient::new(t.hub.clone(), backoff(Duration::from_secs(5)));

    let pending = client.start_refresh("ghost", || {}).await.unwrap();
    assert_eq!(
        pending.decision(),
        &FetchDecision::Rejected(FetchRejection::NoCredentials)
    );
    let report = pending.wait().await;
    assert_eq!(report.outcome, BackoffOutcome::Rejected);
    assert_eq!(report.attempts, 1);
    assert_eq!(t.mentions.call_count(), 0);
}

#[tokio::test]
async fn stuck_fetch_times_out() {
    let t = memory_hub().await;
    t.mentions.hold_fetches();
    t.hub.credentials_available("octocat", Secret::new("ghu_1"));
    let client = MentionsClient::new(t.hub.clone(), backoff(Duration::from_millis(200)));

    let report = client.refresh_and_wait("octocat").await.unwrap();
    assert_eq!(report.outcome, BackoffOutcome::TimedOut);
    let state = t
        .hub
        .fetch_state(&ClientKey::from_username("octocat"))
        .await
        .unwrap()
        .unwrap();
    assert!(state.is_in_progress());
}

#[tokio::test]
async fn joins_a_fetch_already_running() {
    let t = memory_hub().await;
    let key = ClientKey::from_username("octocat");
    t.mentions.hold_fetches();
    t.hub.credentials_available("octocat", Secret::new("ghu_1"));
    let started = t.hub.request_fetch(&key, wed(9, 0, 0)).await.unwrap();
    assert!(matches!(started, FetchDecision::Started { .. }));

    let client = MentionsClient::new(t.hub.clone(), backoff(Duration::from_secs(5)));
    let pending = client.start_refresh("octocat", || {}).await.unwrap();
    assert_eq!(pending.target(), wed(9, 0, 0));
    assert_eq!(
        pending.decision(),
        &FetchDecision::Rejected(FetchRejection::AlreadyInProgress {
            started_at: wed(9, 0, 0)
        })
    );

    t.mentions.release(1);
    let report = pending.wait().await;
    assert_eq!(report.outcome, BackoffOutcome::Succeeded);
    assert_eq!(t.mentions.call_count(), 1);
}

#[tokio::test]
async fn stopped_refresh_skips_callback() {
    let t = memory_hub().await;
    t.mentions.hold_fetches();
    t.hub.credentials_available("octocat", Secret::new("ghu_1"));
    let client = MentionsClient::new(t.hub.clone(), backoff(Duration::from_secs(5)));

    let done = Arc::new(AtomicBool::new(false));
    let pending = {
        let done = Arc::clone(&done);
        client
            .start_refresh("octocat", move || done.store(true, Ordering::SeqCst))
            .await
            .unwrap()
    };
    pending.stop();
    t.mentions.release(1);

    let report = pending.wait().await;
    assert_eq!(report.outcome, BackoffOutcome::Stopped);
    assert!(!done.load(Ordering::SeqCst));
}
