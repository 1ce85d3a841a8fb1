//! Per-session access-token refresh monitor.

use crate::actor::{Process, Transition};
use crate::model::{IssuedToken, Secret, SessionId, Timestamp, UserScope};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Minimum spacing between two refresh requests for one session.
pub const DEFAULT_TOKEN_RETRY_INTERVAL_SECS: u64 = 60;

/// Timing shared by all token monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenMonitorPolicy {
    /// How long to wait for a requested refresh before asking again.
    pub retry_interval: TimeDelta,
}

impl Default for TokenMonitorPolicy {
    fn default() -> Self {
        Self {
            retry_interval: super::interval_secs(DEFAULT_TOKEN_RETRY_INTERVAL_SECS),
        }
    }
}

/// Lifecycle of a monitor. Termination is permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    Monitoring,
    Terminated,
}

/// Persisted monitor state for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMonitorState {
    /// User the session belongs to.
    pub scope: UserScope,
    /// Expiry of the current access token.
    pub when_expires: Timestamp,
    /// Set while a refresh is outstanding.
    pub when_update_requested: Option<Timestamp>,
    /// Token exchanged for the next access token.
    pub refresh_token: Secret,
    pub phase: MonitorPhase,
}

impl TokenMonitorState {
    /// Returns `true` until the session logs out or expires.
    pub fn is_monitoring(&self) -> bool {
        self.phase == MonitorPhase::Monitoring
    }

    /// Returns `true` when a tick at `now` should request a refresh.
    pub fn needs_refresh(&self, now: Timestamp, retry_interval: TimeDelta) -> bool {
        if !self.is_monitoring() || now < self.when_expires {
            return false;
        }
        match self.when_update_requested {
            Some(requested) => now - requested >= retry_interval,
            None => true,
        }
    }
}

/// Inputs of the token monitor.
#[derive(Debug, Clone)]
pub enum TokenMonitorInput {
    /// The session logged in with `token`.
    LoggedIn {
        scope: UserScope,
        token: IssuedToken,
    },
    /// The clock ticked (or a refresh check was requested explicitly).
    Tick(Timestamp),
    /// A refresh finished and issued `token`.
    RefreshCompleted { token: IssuedToken },
    /// The user logged out.
    LoggedOut,
    /// The session can no longer be refreshed.
    SessionExpired,
}

/// Outputs of the token monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenMonitorOutput {
    /// The access token has expired; exchange `refresh_token`.
    RefreshRequested {
        /// Tick time that triggered the request.
        time: Timestamp,
        /// Token to exchange.
        refresh_token: Secret,
        /// User the session belongs to.
        scope: UserScope,
    },
    /// A refreshed access token was recorded.
    ExpiryUpdated {
        /// New expiry.
        expires: Timestamp,
        /// New access token, for the fetch coordinator.
        access_token: Secret,
        /// User the session belongs to.
        scope: UserScope,
    },
    /// Monitoring stopped for good.
    Terminated,
}

impl Process for TokenMonitorState {
    type Key = SessionId;
    type Input = TokenMonitorInput;
    type Output = TokenMonitorOutput;
    type Policy = TokenMonitorPolicy;

    const KIND: &'static str = "token_monitor";

    fn is_final(&self) -> bool {
        self.phase == MonitorPhase::Terminated
    }

    fn apply(
        state: Option<&Self>,
        input: TokenMonitorInput,
        policy: &TokenMonitorPolicy,
    ) -> Transition<Self, TokenMonitorOutput> {
        match (state, input) {
            (None, TokenMonitorInput::LoggedIn { scope, token }) => {
                Transition::set(TokenMonitorState {
                    scope,
                    when_expires: token.expires_at,
                    when_update_requested: None,
                    refresh_token: token.refresh_token,
                    phase: MonitorPhase::Monitoring,
                })
            }
            (Some(_), TokenMonitorInput::LoggedIn { .. }) => Transition::unchanged(),

            (Some(current), TokenMonitorInput::Tick(now))
                if current.needs_refresh(now, policy.retry_interval) =>
            {
                Transition::set(TokenMonitorState {
                    when_update_requested: Some(now),
                    ..current.clone()
                })
                .emit(TokenMonitorOutput::RefreshRequested {
                    time: now,
                    refresh_token: current.refresh_token.clone(),
                    scope: current.scope.clone(),
                })
            }
            (_, TokenMonitorInput::Tick(_)) => Transition::unchanged(),

            (Some(current), TokenMonitorInput::RefreshCompleted { token })
                if current.is_monitoring() =>
            {
                let output = TokenMonitorOutput::ExpiryUpdated {
                    expires: token.expires_at,
                    access_token: token.access_token,
                    scope: current.scope.clone(),
                };
                Transition::set(TokenMonitorState {
                    when_expires: token.expires_at,
                    when_update_requested: None,
                    refresh_token: token.refresh_token,
                    ..current.clone()
                })
                .emit(output)
            }
            (_, TokenMonitorInput::RefreshCompleted { .. }) => Transition::unchanged(),

            (Some(current), TokenMonitorInput::LoggedOut | TokenMonitorInput::SessionExpired)
                if current.is_monitoring() =>
            {
                Transition::set(TokenMonitorState {
                    when_update_requested: None,
                    phase: MonitorPhase::Terminated,
                    ..current.clone()
                })
                .emit(TokenMonitorOutput::Terminated)
            }
            (_, TokenMonitorInput::LoggedOut | TokenMonitorInput::SessionExpired) => {
                Transition::unchanged()
            }
        }
    }
}
