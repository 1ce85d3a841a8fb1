//! Caller-side helper that triggers a mention refresh and polls for its
//! outcome with exponential backoff.

use crate::backoff::{Attempt, BackoffConfig, BackoffReport, BackoffRetrier};
use crate::error::Result;
use crate::hub::{FetchDecision, SyncHub};
use crate::model::{ClientKey, Timestamp};
use crate::process::{FetchRejection, FetchState};
use chrono::Utc;
use tracing::{debug, info};

/// Triggers refreshes through a [`SyncHub`] and waits for them.
#[derive(Clone)]
pub struct MentionsClient {
    hub: SyncHub,
    backoff: BackoffConfig,
}

/// A refresh being polled in the background.
pub struct PendingRefresh {
    client: ClientKey,
    target: Timestamp,
    decision: FetchDecision,
    retrier: BackoffRetrier,
}

impl PendingRefresh {
    pub fn client(&self) -> &ClientKey {
        &self.client
    }

    /// Start time of the fetch being waited for.
    pub fn target(&self) -> Timestamp {
        self.target
    }

    /// What the hub answered when the refresh was requested.
    pub fn decision(&self) -> &FetchDecision {
        &self.decision
    }

    /// Stop polling. The fetch itself keeps running.
    pub fn stop(&self) {
        self.retrier.stop();
    }

    /// Wait until polling ends.
    pub async fn wait(self) -> BackoffReport {
        self.retrier.wait().await
    }
}

/// Classify one observation of the fetch state while waiting for the fetch
/// started at `target`.
pub fn poll_attempt(state: Option<&FetchState>, target: Timestamp) -> Attempt {
    match state {
        None => Attempt::Rejected,
        Some(s) if s.last_successful_fetch_at >= Some(target) => Attempt::Success,
        // Nothing running and no success at or after the target: it failed.
        Some(s) if !s.is_in_progress() => Attempt::Rejected,
        Some(_) => Attempt::Failed,
    }
}

impl MentionsClient {
    pub fn new(hub: SyncHub, backoff: BackoffConfig) -> Self {
        Self { hub, backoff }
    }

    /// Request a fetch for `username` and start polling for its completion.
    ///
    /// When a fetch is already running the client waits for that one instead.
    /// `on_success` runs once the fetch has completed successfully.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::Channel`] if the fetch actor is gone.
    pub async fn start_refresh(
        &self,
        username: &str,
        on_success: impl FnOnce() + Send + 'static,
    ) -> Result<PendingRefresh> {
        let client = ClientKey::from_username(username);
        let now = Utc::now();
        let decision = self.hub.request_fetch(&client, now).await?;
        let target = match decision {
            FetchDecision::Started { since } => {
                debug!(%client, %since, "refresh started");
                now
            }
            FetchDecision::Rejected(FetchRejection::AlreadyInProgress { started_at }) => {
                debug!(%client, %started_at, "joining running fetch");
                started_at
            }
            FetchDecision::Rejected(FetchRejection::NoCredentials) => {
                info!(%client, "refresh requested without credentials");
                now
            }
        };

        let hub = self.hub.clone();
        let key = client.clone();
        let action = move || {
            let hub = hub.clone();
            let key = key.clone();
            async move {
                match hub.fetch_state(&key).await {
                    Ok(state) => poll_attempt(state.as_ref(), target),
                    Err(e) => {
                        debug!(client = %key, "fetch state unavailable: {e}");
                        Attempt::Failed
                    }
                }
            }
        };

        Ok(PendingRefresh {
            client,
            target,
            decision,
            retrier: BackoffRetrier::start(self.backoff, action, on_success),
        })
    }

    /// Request a fetch and wait for the polling outcome.
    ///
    /// # Errors
    ///
    /// See [`start_refresh`](Self::start_refresh).
    pub async fn refresh_and_wait(&self, username: &str) -> Result<BackoffReport> {
        let pending = self.start_refresh(username, || {}).await?;
        Ok(pending.wait().await)
    }
}
