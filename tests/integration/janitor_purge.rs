use crate::helpers::{eventually, memory_hub, start_hub, tick, wait_event, wed};
use chrono::TimeDelta;
use mentions_sync::config::JanitorConfig;
use mentions_sync::{HubStores, JanitorScope, SyncConfig, SyncEvent};

#[tokio::test]
async fn purges_on_first_tick_then_after_interval() {
    let mut t = memory_hub().await;
    let scope = JanitorScope::new("default");

    let fanout = t.hub.on_tick(tick(wed(9, 0, 0)));
    assert_eq!(fanout.janitor, 1);
    let purged = wait_event(&mut t.events, |e| {
        matches!(e, SyncEvent::StoragePurged { .. })
    })
    .await;
    assert_eq!(
        purged,
        SyncEvent::StoragePurged {
            scope: scope.clone(),
            time: wed(9, 0, 0),
            purged: 1
        }
    );

    // Exactly one interval later is still too early.
    t.hub.on_tick(tick(wed(10, 0, 0)));
    let state = t.hub.janitor_state(&scope).await.unwrap().unwrap();
    assert_eq!(state.last_launch_time, Some(wed(9, 0, 0)));

    let later = wed(10, 0, 0) + TimeDelta::seconds(1);
    t.hub.on_tick(tick(later));
    wait_event(&mut t.events, |e| {
        matches!(e, SyncEvent::StoragePurged { time, .. } if *time == later)
    })
    .await;
    assert_eq!(t.purger.runs(), vec![scope.clone(), scope]);
}

#[tokio::test]
async fn one_janitor_per_configured_scope() {
    let config = SyncConfig {
        janitor: JanitorConfig {
            scopes: vec!["notifications".to_owned(), "audit".to_owned()],
        },
        ..SyncConfig::default()
    };
    let mut t = start_hub(config, HubStores::in_memory()).await;

    let fanout = t.hub.on_tick(tick(wed(9, 0, 0)));
    assert_eq!(fanout.janitor, 2);
    let mut seen = Vec::new();
    while seen.len() < 2 {
        if let SyncEvent::StoragePurged { scope, .. } = wait_event(&mut t.events, |e| {
            matches!(e, SyncEvent::StoragePurged { .. })
        })
        .await
        {
            seen.push(scope.to_string());
        }
    }
    seen.sort();
    assert_eq!(seen, vec!["audit", "notifications"]);
    assert!(
        t.hub
            .janitor_state(&JanitorScope::new("default"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn failed_purge_still_advances_the_schedule() {
    let mut t = memory_hub().await;
    let scope = JanitorScope::new("default");
    t.purger.set_failing(true);

    t.hub.on_tick(tick(wed(9, 0, 0)));
    let state = t.hub.janitor_state(&scope).await.unwrap().unwrap();
    assert_eq!(state.last_launch_time, Some(wed(9, 0, 0)));
    eventually("failed purge", || {
        let failures = t.purger.failures();
        async move { failures == 1 }
    })
    .await;

    // The next successful run is reported, the failed one never was.
    t.purger.set_failing(false);
    let later = wed(10, 0, 1);
    t.hub.on_tick(tick(later));
    let purged = wait_event(&mut t.events, |e| {
        matches!(e, SyncEvent::StoragePurged { .. })
    })
    .await;
    assert_eq!(
        purged,
        SyncEvent::StoragePurged {
            scope: scope.clone(),
            time: later,
            purged: 1
        }
    );
    assert_eq!(t.purger.runs(), vec![scope]);
}
