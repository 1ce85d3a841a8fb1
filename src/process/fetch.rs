//! Per-client fetch coordinator with a single-flight guard.
//!
//! A fetch is "in progress" while `fetch_started_at` is set. Starting a second
//! one is rejected, not queued. Completion moves the start time into the
//! success watermark, which never goes backwards.

use crate::actor::{Process, Transition};
use crate::model::{ClientKey, Mention, Secret, Timestamp, previous_working_day_start};
use serde::{Deserialize, Serialize};

/// Why a fetch request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FetchRejection {
    /// Another fetch for the same client has not finished yet.
    #[error("fetch already in progress since {started_at}")]
    AlreadyInProgress {
        /// Start time of the outstanding fetch.
        started_at: Timestamp,
    },
    /// No credentials have been provided for the client.
    #[error("no credentials for client")]
    NoCredentials,
}

/// Persisted fetch state for one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchState {
    /// Credential handed to the mention source.
    pub credential_token: Secret,
    /// Set while a fetch is outstanding.
    pub fetch_started_at: Option<Timestamp>,
    /// Start time of the latest fetch that completed successfully.
    pub last_successful_fetch_at: Option<Timestamp>,
}

impl FetchState {
    /// Fresh state holding only a credential.
    pub fn with_credential(token: Secret) -> Self {
        Self {
            credential_token: token,
            fetch_started_at: None,
            last_successful_fetch_at: None,
        }
    }

    /// Returns `true` while a fetch is outstanding.
    pub fn is_in_progress(&self) -> bool {
        self.fetch_started_at.is_some()
    }

    /// Lower bound for mentions fetched by a run starting at `now`.
    pub fn fetch_since(&self, now: Timestamp) -> Timestamp {
        let working_day = previous_working_day_start(now);
        match self.last_successful_fetch_at {
            Some(last) => last.max(working_day),
            None => working_day,
        }
    }

    fn matches(&self, started_at: Timestamp) -> bool {
        self.fetch_started_at == Some(started_at)
    }
}

/// Inputs of the fetch coordinator.
#[derive(Debug, Clone)]
pub enum FetchInput {
    /// A new credential was issued for the client.
    CredentialsUpdated {
        /// Token to use for subsequent fetches.
        token: Secret,
    },
    /// Start a fetch at `time` unless one is running.
    RequestFetch {
        /// Request time.
        time: Timestamp,
    },
    /// The fetch started at `started_at` returned items.
    FetchSucceeded {
        /// Start time of the finished fetch.
        started_at: Timestamp,
        /// Items observed by the fetch.
        items: Vec<Mention>,
    },
    /// The fetch started at `started_at` failed remotely.
    FetchFailed {
        /// Start time of the finished fetch.
        started_at: Timestamp,
        /// HTTP status, when the failure came with one.
        status_code: Option<u16>,
    },
}

/// Outputs of the fetch coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutput {
    /// The request was refused.
    Rejected(FetchRejection),
    /// A fetch was started; the caller must run it and report back.
    FetchStarted {
        /// Start time, echoed back on completion.
        time: Timestamp,
        /// Only mentions updated after this instant are wanted.
        since: Timestamp,
        /// Credential for the mention source.
        credential: Secret,
    },
    /// One mention from a successful fetch.
    ItemObserved(Mention),
    /// A fetch finished successfully.
    FetchCompleted {
        /// Start time of the finished fetch.
        time: Timestamp,
        /// Number of items observed.
        items: usize,
    },
    /// A fetch failed remotely.
    FetchFailed {
        /// HTTP status, when the failure came with one.
        status_code: Option<u16>,
    },
}

impl Process for FetchState {
    type Key = ClientKey;
    type Input = FetchInput;
    type Output = FetchOutput;
    type Policy = ();

    const KIND: &'static str = "fetch";

    fn apply(state: Option<&Self>, input: FetchInput, _: &()) -> Transition<Self, FetchOutput> {
        match input {
            FetchInput::CredentialsUpdated { token } => match state {
                Some(current) if current.credential_token == token => Transition::unchanged(),
                Some(current) => Transition::set(FetchState {
                    credential_token: token,
                    ..current.clone()
                }),
                None => Transition::set(FetchState::with_credential(token)),
            },
            FetchInput::RequestFetch { time } => request(state, time),
            FetchInput::FetchSucceeded { started_at, items } => match state {
                Some(current) if current.matches(started_at) => {
                    let last = current
                        .last_successful_fetch_at
                        .map_or(started_at, |prev| prev.max(started_at));
                    let count = items.len();
                    Transition::set(FetchState {
                        fetch_started_at: None,
                        last_successful_fetch_at: Some(last),
                        ..current.clone()
                    })
                    .emit_all(items.into_iter().map(FetchOutput::ItemObserved))
                    .emit(FetchOutput::FetchCompleted {
                        time: started_at,
                        items: count,
                    })
                }
                _ => Transition::unchanged(),
            },
            FetchInput::FetchFailed {
                started_at,
                status_code,
            } => match state {
                Some(current) if current.matches(started_at) => Transition::set(FetchState {
                    fetch_started_at: None,
                    ..current.clone()
                })
                .emit(FetchOutput::FetchFailed { status_code }),
                _ => Transition::unchanged(),
            },
        }
    }
}

fn request(state: Option<&FetchState>, time: Timestamp) -> Transition<FetchState, FetchOutput> {
    let Some(current) = state else {
        return Transition::unchanged().emit(FetchOutput::Rejected(FetchRejection::NoCredentials));
    };
    if let Some(started_at) = current.fetch_started_at {
        return Transition::unchanged()
            .emit(FetchOutput::Rejected(FetchRejection::AlreadyInProgress { started_at }));
    }
    let since = current.fetch_since(time);
    Transition::set(FetchState {
        fetch_started_at: Some(time),
        ..current.clone()
    })
    .emit(FetchOutput::FetchStarted {
        time,
        since,
        credential: current.credential_token.clone(),
    })
}
