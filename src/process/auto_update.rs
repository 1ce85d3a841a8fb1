//! Per-client auto-update scheduler.
//!
//! Decides on each tick whether enough time has passed since the last fetch
//! request and, if so, asks for a new one. Whether the fetch succeeds is the
//! fetch coordinator's concern.

use crate::actor::{Process, Transition};
use crate::model::{ClientKey, Timestamp};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Minimum spacing between scheduled fetch requests for one client.
pub const DEFAULT_AUTO_UPDATE_INTERVAL_SECS: u64 = 60;

/// Timing shared by all auto-update schedulers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoUpdatePolicy {
    /// Minimum spacing between fetch requests (inclusive).
    pub interval: TimeDelta,
}

impl Default for AutoUpdatePolicy {
    fn default() -> Self {
        Self {
            interval: super::interval_secs(DEFAULT_AUTO_UPDATE_INTERVAL_SECS),
        }
    }
}

/// Persisted scheduler state for one client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoUpdateState {
    /// Tick time of the last fetch request this scheduler issued.
    pub last_request_time: Option<Timestamp>,
}

impl AutoUpdateState {
    /// Returns `true` when a tick at `now` should request a fetch.
    ///
    /// The boundary is inclusive: a tick exactly `interval` after the last
    /// request is due. Ticks earlier than the last request are never due.
    pub fn is_due(&self, now: Timestamp, interval: TimeDelta) -> bool {
        match self.last_request_time {
            None => true,
            Some(last) => now - last >= interval,
        }
    }
}

/// Inputs of the auto-update scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoUpdateInput {
    /// Credentials for the client became available.
    CredentialsAvailable,
    /// The clock ticked.
    Tick(Timestamp),
    /// The client's credentials were withdrawn (logout).
    CredentialsRevoked,
}

/// Outputs of the auto-update scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoUpdateOutput {
    /// Emitted once, when scheduling begins for a client.
    SchedulingStarted,
    /// Ask the fetch coordinator for a fetch.
    FetchRequested {
        /// Tick time that triggered the request.
        time: Timestamp,
    },
}

impl Process for AutoUpdateState {
    type Key = ClientKey;
    type Input = AutoUpdateInput;
    type Output = AutoUpdateOutput;
    type Policy = AutoUpdatePolicy;

    const KIND: &'static str = "auto_update";

    fn apply(
        state: Option<&Self>,
        input: AutoUpdateInput,
        policy: &AutoUpdatePolicy,
    ) -> Transition<Self, AutoUpdateOutput> {
        match (state, input) {
            (None, AutoUpdateInput::CredentialsAvailable) => {
                Transition::set(AutoUpdateState::default())
                    .emit(AutoUpdateOutput::SchedulingStarted)
            }
            (Some(_), AutoUpdateInput::CredentialsAvailable) => Transition::unchanged(),
            (Some(current), AutoUpdateInput::Tick(now)) if current.is_due(now, policy.interval) => {
                Transition::set(AutoUpdateState {
                    last_request_time: Some(now),
                })
                .emit(AutoUpdateOutput::FetchRequested { time: now })
            }
            (_, AutoUpdateInput::Tick(_)) => Transition::unchanged(),
            (Some(_), AutoUpdateInput::CredentialsRevoked) => Transition::clear(),
            (None, AutoUpdateInput::CredentialsRevoked) => Transition::unchanged(),
        }
    }
}
