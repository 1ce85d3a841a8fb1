use crate::helpers::{drain_events, memory_hub, tick, wait_event, wed};
use chrono::{TimeZone, Utc};
use mentions_sync::collab::FetchFailure;
use mentions_sync::process::FetchRejection;
use mentions_sync::{ClientKey, FetchDecision, Mention, Secret, SyncEvent};

fn mention(id: &str) -> Mention {
    Mention {
        id: id.to_owned(),
        url: format!("https://github.com/octo-org/octo-repo/issues/{id}"),
        title: format!("mention {id}"),
        updated_at: wed(8, 0, 0),
    }
}

#[tokio::test]
async fn tick_schedules_one_fetch_per_interval() {
    let mut t = memory_hub().await;
    let client = ClientKey::from_username("Octocat");

    t.hub.credentials_available("Octocat", Secret::new("ghu_1"));
    let started = wait_event(&mut t.events, |e| {
        matches!(e, SyncEvent::SchedulingStarted { .. })
    })
    .await;
    assert_eq!(started.key(), "octocat");

    t.hub.on_tick(tick(wed(9, 0, 0)));
    wait_event(&mut t.events, |e| {
        matches!(e, SyncEvent::FetchCompleted { .. })
    })
    .await;
    let calls = t.mentions.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].credential, "ghu_1");
    assert_eq!(calls[0].since, Utc.with_ymd_and_hms(2024, 5, 14, 0, 0, 0).unwrap());

    // A duplicate tick and one inside the interval do nothing.
    t.hub.on_tick(tick(wed(9, 0, 0)));
    t.hub.on_tick(tick(wed(9, 0, 59)));
    let state = t.hub.auto_update_state(&client).await.unwrap().unwrap();
    assert_eq!(state.last_request_time, Some(wed(9, 0, 0)));
    assert_eq!(t.mentions.call_count(), 1);

    // Exactly one interval later is due.
    t.hub.on_tick(tick(wed(9, 1, 0)));
    wait_event(&mut t.events, |e| {
        matches!(e, SyncEvent::FetchCompleted { time, .. } if *time == wed(9, 1, 0))
    })
    .await;
    assert_eq!(t.mentions.call_count(), 2);
    assert_eq!(t.mentions.calls()[1].since, wed(9, 0, 0));
}

#[tokio::test]
async fn concurrent_requests_never_double_fetch() {
    let mut t = memory_hub().await;
    let client = ClientKey::from_username("octocat");
    t.mentions.hold_fetches();
    t.hub.credentials_available("octocat", Secret::new("ghu_1"));

    let first = t.hub.request_fetch(&client, wed(9, 0, 0)).await.unwrap();
    assert_eq!(
        first,
        FetchDecision::Started {
            since: Utc.with_ymd_and_hms(2024, 5, 14, 0, 0, 0).unwrap()
        }
    );
    let second = t.hub.request_fetch(&client, wed(9, 0, 5)).await.unwrap();
    assert_eq!(
        second,
        FetchDecision::Rejected(FetchRejection::AlreadyInProgress {
            started_at: wed(9, 0, 0)
        })
    );

    t.mentions.release(1);
    wait_event(&mut t.events, |e| {
        matches!(e, SyncEvent::FetchCompleted { .. })
    })
    .await;
    assert_eq!(t.mentions.call_count(), 1);

    let state = t.hub.fetch_state(&client).await.unwrap().unwrap();
    assert!(!state.is_in_progress());
    assert_eq!(state.last_successful_fetch_at, Some(wed(9, 0, 0)));

    t.mentions.release(1);
    let third = t.hub.request_fetch(&client, wed(9, 5, 0)).await.unwrap();
    assert_eq!(third, FetchDecision::Started { since: wed(9, 0, 0) });
}

#[tokio::test]
async fn request_without_credentials_is_rejected() {
    let t = memory_hub().await;
    let decision = t
        .hub
        .request_fetch(&ClientKey::new("stranger"), wed(9, 0, 0))
        .await
        .unwrap();
    assert_eq!(decision, FetchDecision::Rejected(FetchRejection::NoCredentials));
    assert_eq!(t.mentions.call_count(), 0);
}

#[tokio::test]
async fn observed_items_precede_completion() {
    let mut t = memory_hub().await;
    let client = ClientKey::from_username("octocat");
    t.mentions.push_items(vec![mention("1"), mention("2")]);
    t.hub.credentials_available("octocat", Secret::new("ghu_1"));

    t.hub.request_fetch(&client, wed(9, 0, 0)).await.unwrap();
    wait_event(&mut t.events, |e| {
        matches!(e, SyncEvent::FetchCompleted { items: 2, .. })
    })
    .await;

    // Events of one fetch, in emission order.
    let mut seen: Vec<&'static str> = Vec::new();
    let mut rx = t.hub.subscribe();
    t.mentions.push_items(vec![mention("3")]);
    t.hub.request_fetch(&client, wed(9, 10, 0)).await.unwrap();
    wait_event(&mut rx, |e| {
        seen.push(e.name());
        matches!(e, SyncEvent::FetchCompleted { .. })
    })
    .await;
    assert_eq!(seen, vec!["fetch_started", "item_observed", "fetch_completed"]);
}

#[tokio::test]
async fn remote_failure_keeps_watermark() {
    let mut t = memory_hub().await;
    let client = ClientKey::from_username("octocat");
    t.hub.credentials_available("octocat", Secret::new("ghu_1"));

    t.hub.request_fetch(&client, wed(9, 0, 0)).await.unwrap();
    wait_event(&mut t.events, |e| {
        matches!(e, SyncEvent::FetchCompleted { .. })
    })
    .await;

    t.mentions.push_failure(FetchFailure::status(502, "bad gateway"));
    t.hub.request_fetch(&client, wed(9, 5, 0)).await.unwrap();
    let failed = wait_event(&mut t.events, |e| {
        matches!(e, SyncEvent::FetchFailed { .. })
    })
    .await;
    assert_eq!(
        failed,
        SyncEvent::FetchFailed {
            client: client.clone(),
            status_code: Some(502)
        }
    );

    let state = t.hub.fetch_state(&client).await.unwrap().unwrap();
    assert!(!state.is_in_progress());
    assert_eq!(state.last_successful_fetch_at, Some(wed(9, 0, 0)));
    assert!(
        drain_events(&mut t.events)
            .iter()
            .all(|e| !matches!(e, SyncEvent::FetchCompleted { .. }))
    );
}

#[tokio::test]
async fn revoked_credentials_stop_scheduling() {
    let mut t = memory_hub().await;
    let client = ClientKey::from_username("octocat");
    t.hub.credentials_available("octocat", Secret::new("ghu_1"));
    wait_event(&mut t.events, |e| {
        matches!(e, SyncEvent::SchedulingStarted { .. })
    })
    .await;

    t.hub.credentials_revoked("octocat");
    assert_eq!(t.hub.auto_update_state(&client).await.unwrap(), None);

    t.hub.on_tick(tick(wed(9, 0, 0)));
    assert_eq!(t.hub.auto_update_state(&client).await.unwrap(), None);
    assert_eq!(t.mentions.call_count(), 0);
}
