//! Scriptable in-memory collaborators for tests and the harness.

use super::{ArchivePurger, CredentialRefresher, FetchFailure, MentionSource, RefreshOutcome};
use crate::error::{Result, SyncError};
use crate::model::{ClientKey, IssuedToken, JanitorScope, Mention, Secret, SessionId, Timestamp};
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One recorded `fetch_items` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub client: ClientKey,
    pub credential: String,
    pub since: Timestamp,
}

/// Mention source answering from a queue of scripted responses.
///
/// An empty queue answers with no items. With [`hold_fetches`] enabled each
/// call waits for one [`release`] before answering, which lets tests keep a
/// fetch in flight.
///
/// [`hold_fetches`]: ScriptedMentionSource::hold_fetches
/// [`release`]: ScriptedMentionSource::release
#[derive(Default)]
pub struct ScriptedMentionSource {
    responses: Mutex<VecDeque<std::result::Result<Vec<Mention>, FetchFailure>>>,
    calls: Mutex<Vec<FetchCall>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl ScriptedMentionSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response.
    pub fn push_items(&self, items: Vec<Mention>) {
        lock(&self.responses).push_back(Ok(items));
    }

    /// Queue a failed response.
    pub fn push_failure(&self, failure: FetchFailure) {
        lock(&self.responses).push_back(Err(failure));
    }

    /// Make every subsequent fetch wait for a [`release`](Self::release).
    pub fn hold_fetches(&self) {
        *lock(&self.gate) = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held fetches proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = lock(&self.gate).as_ref() {
            gate.add_permits(n);
        }
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<FetchCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl MentionSource for ScriptedMentionSource {
    async fn fetch_items(
        &self,
        client: &ClientKey,
        credential: &str,
        since: Timestamp,
    ) -> std::result::Result<Vec<Mention>, FetchFailure> {
        lock(&self.calls).push(FetchCall {
            client: client.clone(),
            credential: credential.to_owned(),
            since,
        });

        let gate = lock(&self.gate).clone();
        if let Some(gate) = gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(FetchFailure::transport("mention source closed")),
            }
        }

        lock(&self.responses).pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Refresher answering from a queue, then issuing fresh tokens.
pub struct ScriptedRefresher {
    outcomes: Mutex<VecDeque<RefreshOutcome>>,
    calls: Mutex<Vec<(SessionId, String)>>,
    lifetime: TimeDelta,
}

impl Default for ScriptedRefresher {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRefresher {
    /// Refresher whose fallback tokens live for one hour.
    pub fn new() -> Self {
        Self::with_lifetime(TimeDelta::hours(1))
    }

    pub fn with_lifetime(lifetime: TimeDelta) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            lifetime,
        }
    }

    pub fn push(&self, outcome: RefreshOutcome) {
        lock(&self.outcomes).push_back(outcome);
    }

    /// `(session, refresh_token)` of every call so far.
    pub fn calls(&self) -> Vec<(SessionId, String)> {
        lock(&self.calls).clone()
    }

    fn issue(&self) -> IssuedToken {
        IssuedToken {
            access_token: Secret::new(format!("ghu_{}", uuid::Uuid::new_v4().simple())),
            refresh_token: Secret::new(format!("ghr_{}", uuid::Uuid::new_v4().simple())),
            expires_at: Utc::now() + self.lifetime,
        }
    }
}

#[async_trait]
impl CredentialRefresher for ScriptedRefresher {
    async fn refresh(&self, session: &SessionId, refresh_token: &str) -> RefreshOutcome {
        lock(&self.calls).push((session.clone(), refresh_token.to_owned()));
        let scripted = lock(&self.outcomes).pop_front();
        scripted.unwrap_or_else(|| RefreshOutcome::Refreshed(self.issue()))
    }
}

/// Purger that records the scopes it was asked to purge.
#[derive(Default)]
pub struct RecordingPurger {
    purged: Mutex<Vec<JanitorScope>>,
    per_run: usize,
    fail: Mutex<bool>,
    failures: Mutex<usize>,
}

impl RecordingPurger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `count` removed records on every run.
    pub fn reporting(count: usize) -> Self {
        Self {
            per_run: count,
            ..Self::default()
        }
    }

    /// Make subsequent runs fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        *lock(&self.fail) = fail;
    }

    pub fn runs(&self) -> Vec<JanitorScope> {
        lock(&self.purged).clone()
    }

    /// Number of runs that failed.
    pub fn failures(&self) -> usize {
        *lock(&self.failures)
    }
}

#[async_trait]
impl ArchivePurger for RecordingPurger {
    async fn purge_archived(&self, scope: &JanitorScope) -> Result<usize> {
        if *lock(&self.fail) {
            *lock(&self.failures) += 1;
            return Err(SyncError::Collaborator(format!("purge of {scope} failed")));
        }
        lock(&self.purged).push(scope.clone());
        Ok(self.per_run)
    }
}
