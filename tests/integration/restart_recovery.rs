use crate::helpers::{issued, start_hub, tick, wait_event, wed};
use chrono::{TimeZone, Utc};
use mentions_sync::hub::SessionVerdict;
use mentions_sync::{
    ClientKey, FetchDecision, HubStores, Secret, SessionId, SyncConfig, SyncEvent, UserScope,
};

fn json_stores(dir: &tempfile::TempDir) -> HubStores {
    HubStores::json_dir(dir.path()).unwrap()
}

#[tokio::test]
async fn watermarks_and_sessions_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let client = ClientKey::from_username("octocat");
    let scope = UserScope::for_username("octocat");
    let session = SessionId::new("s-1");

    {
        let mut t = start_hub(SyncConfig::default(), json_stores(&dir)).await;
        t.hub
            .login(&scope, &session, issued("ghu_1", "ghr_1", wed(18, 0, 0)))
            .await
            .unwrap();
        wait_event(&mut t.events, |e| {
            matches!(e, SyncEvent::SchedulingStarted { .. })
        })
        .await;
        t.hub.on_tick(tick(wed(9, 0, 0)));
        wait_event(&mut t.events, |e| {
            matches!(e, SyncEvent::FetchCompleted { .. })
        })
        .await;
        // Reads queue behind the writes, so state is on disk afterwards.
        assert!(t.hub.fetch_state(&client).await.unwrap().is_some());
        assert!(t.hub.auto_update_state(&client).await.unwrap().is_some());
        t.hub.shutdown();
    }
    for kind in ["auto_update", "fetch", "token_monitor", "sessions", "janitor"] {
        assert!(dir.path().join(format!("{kind}.json")).exists(), "{kind}");
    }

    let mut t = start_hub(SyncConfig::default(), json_stores(&dir)).await;
    let fetch = t.hub.fetch_state(&client).await.unwrap().unwrap();
    assert_eq!(fetch.last_successful_fetch_at, Some(wed(9, 0, 0)));
    assert_eq!(fetch.credential_token, Secret::new("ghu_1"));
    assert!(!fetch.is_in_progress());
    let auto = t.hub.auto_update_state(&client).await.unwrap().unwrap();
    assert_eq!(auto.last_request_time, Some(wed(9, 0, 0)));
    assert_eq!(
        t.hub.verify_session(&scope, &session).await.unwrap(),
        SessionVerdict::Verified
    );
    let token = t.hub.token_state(&session).await.unwrap().unwrap();
    assert_eq!(token.when_expires, wed(18, 0, 0));

    // The restored scheduler picks up where it left off.
    let fanout = t.hub.on_tick(tick(wed(9, 0, 30)));
    assert_eq!(fanout.auto_update, 1);
    let auto = t.hub.auto_update_state(&client).await.unwrap().unwrap();
    assert_eq!(auto.last_request_time, Some(wed(9, 0, 0)));

    t.hub.on_tick(tick(wed(9, 1, 0)));
    wait_event(&mut t.events, |e| {
        matches!(e, SyncEvent::FetchCompleted { .. })
    })
    .await;
    let calls = t.mentions.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].since, wed(9, 0, 0));
    assert_eq!(calls[0].credential, "ghu_1");
}

#[tokio::test]
async fn interrupted_fetch_is_closed_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let client = ClientKey::from_username("octocat");

    {
        let t = start_hub(SyncConfig::default(), json_stores(&dir)).await;
        t.mentions.hold_fetches();
        t.hub.credentials_available("octocat", Secret::new("ghu_1"));
        let decision = t.hub.request_fetch(&client, wed(9, 0, 0)).await.unwrap();
        assert!(matches!(decision, FetchDecision::Started { .. }));
        let state = t.hub.fetch_state(&client).await.unwrap().unwrap();
        assert_eq!(state.fetch_started_at, Some(wed(9, 0, 0)));
        t.hub.shutdown();
    }

    let mut t = start_hub(SyncConfig::default(), json_stores(&dir)).await;
    let state = t.hub.fetch_state(&client).await.unwrap().unwrap();
    assert!(!state.is_in_progress());
    assert_eq!(state.last_successful_fetch_at, None);

    let decision = t.hub.request_fetch(&client, wed(9, 5, 0)).await.unwrap();
    assert_eq!(
        decision,
        FetchDecision::Started {
            since: Utc.with_ymd_and_hms(2024, 5, 14, 0, 0, 0).unwrap()
        }
    );
    wait_event(&mut t.events, |e| {
        matches!(e, SyncEvent::FetchCompleted { .. })
    })
    .await;
    let state = t.hub.fetch_state(&client).await.unwrap().unwrap();
    assert_eq!(state.last_successful_fetch_at, Some(wed(9, 5, 0)));
}
