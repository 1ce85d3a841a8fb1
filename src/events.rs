//! Events published by the hub to subscribers.

use crate::model::{ClientKey, JanitorScope, Mention, SessionId, Timestamp, UserScope};
use serde::{Deserialize, Serialize};

/// Something the coordination layer did or observed.
///
/// Credentials never appear in events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    SchedulingStarted {
        client: ClientKey,
    },
    FetchRequested {
        client: ClientKey,
        time: Timestamp,
    },
    FetchStarted {
        client: ClientKey,
        time: Timestamp,
        since: Timestamp,
    },
    ItemObserved {
        client: ClientKey,
        mention: Mention,
    },
    FetchCompleted {
        client: ClientKey,
        time: Timestamp,
        items: usize,
    },
    FetchFailed {
        client: ClientKey,
        status_code: Option<u16>,
    },
    TokenRefreshRequested {
        session: SessionId,
        time: Timestamp,
    },
    TokenExpiryUpdated {
        session: SessionId,
        expires: Timestamp,
    },
    MonitoringTerminated {
        session: SessionId,
    },
    SessionVerified {
        scope: UserScope,
        session: SessionId,
    },
    SessionVerificationFailed {
        scope: UserScope,
        session: SessionId,
    },
    StoragePurged {
        scope: JanitorScope,
        time: Timestamp,
        purged: usize,
    },
}

impl SyncEvent {
    /// Stable snake_case name, matching the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SchedulingStarted { .. } => "scheduling_started",
            Self::FetchRequested { .. } => "fetch_requested",
            Self::FetchStarted { .. } => "fetch_started",
            Self::ItemObserved { .. } => "item_observed",
            Self::FetchCompleted { .. } => "fetch_completed",
            Self::FetchFailed { .. } => "fetch_failed",
            Self::TokenRefreshRequested { .. } => "token_refresh_requested",
            Self::TokenExpiryUpdated { .. } => "token_expiry_updated",
            Self::MonitoringTerminated { .. } => "monitoring_terminated",
            Self::SessionVerified { .. } => "session_verified",
            Self::SessionVerificationFailed { .. } => "session_verification_failed",
            Self::StoragePurged { .. } => "storage_purged",
        }
    }

    /// Key of the instance the event belongs to.
    pub fn key(&self) -> &str {
        match self {
            Self::SchedulingStarted { client }
            | Self::FetchRequested { client, .. }
            | Self::FetchStarted { client, .. }
            | Self::ItemObserved { client, .. }
            | Self::FetchCompleted { client, .. }
            | Self::FetchFailed { client, .. } => client.as_str(),
            Self::TokenRefreshRequested { session, .. }
            | Self::TokenExpiryUpdated { session, .. }
            | Self::MonitoringTerminated { session }
            | Self::SessionVerified { session, .. }
            | Self::SessionVerificationFailed { session, .. } => session.as_str(),
            Self::StoragePurged { scope, .. } => scope.as_str(),
        }
    }
}
