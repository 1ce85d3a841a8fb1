//! Shared helpers for integration tests.

use chrono::{TimeZone, Utc};
use mentions_sync::clock::TimePassed;
use mentions_sync::collab::{
    Collaborators, RecordingPurger, ScriptedMentionSource, ScriptedRefresher,
};
use mentions_sync::model::Timestamp;
use mentions_sync::{HubStores, IssuedToken, Secret, SyncConfig, SyncEvent, SyncHub};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

/// A running hub with handles on its scripted collaborators.
pub(crate) struct TestHub {
    pub hub: SyncHub,
    pub mentions: Arc<ScriptedMentionSource>,
    pub refresher: Arc<ScriptedRefresher>,
    pub purger: Arc<RecordingPurger>,
    pub events: broadcast::Receiver<SyncEvent>,
}

pub(crate) async fn start_hub(config: SyncConfig, stores: HubStores) -> TestHub {
    let mentions = Arc::new(ScriptedMentionSource::new());
    let refresher = Arc::new(ScriptedRefresher::new());
    let purger = Arc::new(RecordingPurger::reporting(1));
    let collab = Collaborators::new(mentions.clone(), refresher.clone(), purger.clone());
    let hub = SyncHub::start(&config, collab, stores)
        .await
        .expect("start hub");
    let events = hub.subscribe();
    TestHub {
        hub,
        mentions,
        refresher,
        purger,
        events,
    }
}

pub(crate) async fn memory_hub() -> TestHub {
    start_hub(SyncConfig::default(), HubStores::in_memory()).await
}

/// Wednesday 2024-05-15 at `h:m` UTC plus `s` seconds.
pub(crate) fn wed(h: u32, m: u32, s: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 5, 15, h, m, s).unwrap()
}

pub(crate) fn tick(time: Timestamp) -> TimePassed {
    TimePassed { time }
}

pub(crate) fn issued(access: &str, refresh: &str, expires_at: Timestamp) -> IssuedToken {
    IssuedToken {
        access_token: Secret::new(access),
        refresh_token: Secret::new(refresh),
        expires_at,
    }
}

/// Receive events until one matches, failing after a few seconds.
pub(crate) async fn wait_event(
    rx: &mut broadcast::Receiver<SyncEvent>,
    mut pred: impl FnMut(&SyncEvent) -> bool,
) -> SyncEvent {
    let found = tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await;
    found.expect("timed out waiting for event")
}

/// Drain all pending events into a Vec.
pub(crate) fn drain_events(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Poll `check` until it returns `true`, failing after a few seconds.
pub(crate) async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
