//! Periodic purge of archived storage, one janitor per scope.

use crate::actor::{Process, Transition};
use crate::model::{JanitorScope, Timestamp};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Minimum spacing between two purges of one scope.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3_600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JanitorPolicy {
    /// A purge runs only once strictly more than this has elapsed.
    pub cleanup_interval: TimeDelta,
}

impl Default for JanitorPolicy {
    fn default() -> Self {
        Self {
            cleanup_interval: super::interval_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JanitorState {
    /// Tick time of the last purge.
    pub last_launch_time: Option<Timestamp>,
}

impl JanitorState {
    /// Returns `true` when a tick at `now` should launch a purge.
    pub fn is_due(&self, now: Timestamp, interval: TimeDelta) -> bool {
        match self.last_launch_time {
            None => true,
            Some(last) => now - last > interval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JanitorInput {
    Tick(Timestamp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JanitorOutput {
    /// Purge archived data for the scope now.
    PurgeDue { time: Timestamp },
}

impl Process for JanitorState {
    type Key = JanitorScope;
    type Input = JanitorInput;
    type Output = JanitorOutput;
    type Policy = JanitorPolicy;

    const KIND: &'static str = "janitor";

    fn apply(
        state: Option<&Self>,
        input: JanitorInput,
        policy: &JanitorPolicy,
    ) -> Transition<Self, JanitorOutput> {
        let JanitorInput::Tick(now) = input;
        let current = state.cloned().unwrap_or_default();
        if !current.is_due(now, policy.cleanup_interval) {
            return Transition::unchanged();
        }
        Transition::set(JanitorState {
            last_launch_time: Some(now),
        })
        .emit(JanitorOutput::PurgeDue { time: now })
    }
}
