//! Interfaces to the outside world: GitHub search, the OAuth token endpoint,
//! and archived storage.
//!
//! The hub calls these from spawned tasks, never from inside an actor, so an
//! implementation may take as long as it needs.

pub mod memory;

pub use memory::{RecordingPurger, ScriptedMentionSource, ScriptedRefresher};

use crate::error::Result;
use crate::model::{ClientKey, IssuedToken, JanitorScope, Mention, SessionId, Timestamp};
use async_trait::async_trait;
use std::sync::Arc;

/// A mention fetch that failed remotely.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("mention fetch failed (status {status_code:?}): {message}")]
pub struct FetchFailure {
    /// HTTP status, if the failure came with one.
    pub status_code: Option<u16>,
    pub message: String,
}

impl FetchFailure {
    pub fn status(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            message: message.into(),
        }
    }

    /// Failure without an HTTP response (connection reset, DNS, ...).
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status_code: None,
            message: message.into(),
        }
    }
}

/// Result of exchanging a refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new access token was issued.
    Refreshed(IssuedToken),
    /// Transient failure; the monitor asks again after its retry interval.
    Failed(String),
    /// The refresh token is no longer accepted; the session is over.
    Revoked,
}

/// Source of GitHub mentions.
#[async_trait]
pub trait MentionSource: Send + Sync {
    /// Fetch mentions of `client` updated after `since`.
    async fn fetch_items(
        &self,
        client: &ClientKey,
        credential: &str,
        since: Timestamp,
    ) -> std::result::Result<Vec<Mention>, FetchFailure>;
}

/// Exchanges refresh tokens for new access tokens.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh(&self, session: &SessionId, refresh_token: &str) -> RefreshOutcome;
}

/// Deletes archived data older than the retention window.
#[async_trait]
pub trait ArchivePurger: Send + Sync {
    /// Purge one scope, returning the number of removed records.
    async fn purge_archived(&self, scope: &JanitorScope) -> Result<usize>;
}

/// The three collaborators a hub needs.
#[derive(Clone)]
pub struct Collaborators {
    pub mentions: Arc<dyn MentionSource>,
    pub refresher: Arc<dyn CredentialRefresher>,
    pub purger: Arc<dyn ArchivePurger>,
}

impl Collaborators {
    pub fn new(
        mentions: Arc<dyn MentionSource>,
        refresher: Arc<dyn CredentialRefresher>,
        purger: Arc<dyn ArchivePurger>,
    ) -> Self {
        Self {
            mentions,
            refresher,
            purger,
        }
    }

    /// In-memory collaborators that succeed with empty results.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(ScriptedMentionSource::new()),
            Arc::new(ScriptedRefresher::new()),
            Arc::new(RecordingPurger::new()),
        )
    }
}
