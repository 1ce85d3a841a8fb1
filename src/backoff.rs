//! Exponential-backoff retry loop with a hard time budget.
//!
//! [`BackoffRetrier`] repeatedly invokes a caller-supplied async action until
//! it succeeds, is rejected, or the time budget runs out. Waiting happens on a
//! spawned tokio task, so [`BackoffRetrier::start`] returns immediately.
//!
//! # Outcomes
//!
//! - [`Attempt::Success`] runs the `on_success` callback and ends the loop.
//! - [`Attempt::Rejected`] ends the loop at once; rejections are terminal.
//! - [`Attempt::Failed`] schedules another attempt after the current delay,
//!   then grows the delay by `growth_factor`, capped at `max_delay`.
//!
//! Exceeding `time_limit` ends the loop silently with
//! [`BackoffOutcome::TimedOut`]; it is not an error.

use crate::error::{Result, SyncError};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of one invocation of the retried action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// The awaited outcome is available.
    Success,
    /// The outcome will never become available; do not retry.
    Rejected,
    /// Not yet; try again later.
    Failed,
}

/// How a retry loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffOutcome {
    /// The action returned [`Attempt::Success`] and `on_success` ran.
    Succeeded,
    /// The action returned [`Attempt::Rejected`].
    Rejected,
    /// The time budget was exhausted.
    TimedOut,
    /// [`BackoffRetrier::stop`] was called.
    Stopped,
}

/// Terminal report of a retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffReport {
    /// How the loop ended.
    pub outcome: BackoffOutcome,
    /// Number of times the action was invoked.
    pub attempts: u32,
}

/// Validated retry timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    min_delay: Duration,
    max_delay: Duration,
    growth_factor: f64,
    time_limit: Duration,
}

impl BackoffConfig {
    /// Start building a config from the default timings.
    pub fn builder() -> BackoffConfigBuilder {
        BackoffConfigBuilder::default()
    }

    /// Delay before the second attempt.
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Upper bound for any single delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Multiplier applied to the delay after each failed attempt.
    pub fn growth_factor(&self) -> f64 {
        self.growth_factor
    }

    /// Total time budget measured from `start`.
    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    /// Delay that follows `current`: `min(current * factor, max_delay)`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.growth_factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Builder for [`BackoffConfig`].
#[derive(Debug, Clone)]
pub struct BackoffConfigBuilder {
    min_delay: Duration,
    max_delay: Duration,
    growth_factor: f64,
    time_limit: Duration,
}

impl Default for BackoffConfigBuilder {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            growth_factor: 2.0,
            time_limit: Duration::from_secs(30),
        }
    }
}

impl BackoffConfigBuilder {
    /// Set the first retry delay.
    pub fn min_delay(mut self, delay: Duration) -> Self {
        self.min_delay = delay;
        self
    }

    /// Set the delay cap.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor (must be greater than 1).
    pub fn growth_factor(mut self, factor: f64) -> Self {
        self.growth_factor = factor;
        self
    }

    /// Set the total time budget.
    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }

    /// Validate and produce the config.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Backoff`] when `min_delay` is zero or exceeds
    /// `max_delay`, or when `growth_factor` is not a finite number above 1.
    pub fn build(self) -> Result<BackoffConfig> {
        if self.min_delay.is_zero() {
            return Err(SyncError::Backoff("min_delay must be non-zero".to_owned()));
        }
        if self.min_delay > self.max_delay {
            return Err(SyncError::Backoff(format!(
                "min_delay ({:?}) exceeds max_delay ({:?})",
                self.min_delay, self.max_delay
            )));
        }
        if !self.growth_factor.is_finite() || self.growth_factor <= 1.0 {
            return Err(SyncError::Backoff(format!(
                "growth_factor must be greater than 1, got {}",
                self.growth_factor
            )));
        }
        Ok(BackoffConfig {
            min_delay: self.min_delay,
            max_delay: self.max_delay,
            growth_factor: self.growth_factor,
            time_limit: self.time_limit,
        })
    }
}

/// Handle to a running retry loop.
///
/// Dropping the handle does not stop the loop; call [`stop`](Self::stop).
pub struct BackoffRetrier {
    stopped: Arc<Mutex<bool>>,
    cancel: CancellationToken,
    handle: JoinHandle<BackoffReport>,
}

impl BackoffRetrier {
    /// Spawn the retry loop on the current tokio runtime.
    ///
    /// The first attempt runs immediately. Must be called from within a
    /// tokio runtime.
    pub fn start<A, Fut, S>(config: BackoffConfig, action: A, on_success: S) -> Self
    where
        A: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Attempt> + Send + 'static,
        S: FnOnce() + Send + 'static,
    {
        let stopped = Arc::new(Mutex::new(false));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            config,
            action,
            on_success,
            Arc::clone(&stopped),
            cancel.clone(),
        ));
        Self {
            stopped,
            cancel,
            handle,
        }
    }

    /// Cancel the loop.
    ///
    /// Safe to call from any thread, any number of times. Once this returns,
    /// the action is never invoked again, including a retry already waiting
    /// on its delay.
    pub fn stop(&self) {
        let mut stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        *stopped = true;
        self.cancel.cancel();
    }

    /// Returns `true` once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the loop to reach a terminal outcome.
    pub async fn wait(self) -> BackoffReport {
        match self.handle.await {
            Ok(report) => report,
            Err(e) => {
                warn!("backoff loop ended abnormally: {e}");
                BackoffReport {
                    outcome: BackoffOutcome::Stopped,
                    attempts: 0,
                }
            }
        }
    }
}

async fn run_loop<A, Fut, S>(
    config: BackoffConfig,
    mut action: A,
    on_success: S,
    stopped: Arc<Mutex<bool>>,
    cancel: CancellationToken,
) -> BackoffReport
where
    A: FnMut() -> Fut,
    Fut: Future<Output = Attempt>,
    S: FnOnce(),
{
    let started = Instant::now();
    let mut on_success = Some(on_success);
    let mut delay = config.min_delay;
    let mut attempts: u32 = 0;

    let report = |outcome, attempts| BackoffReport { outcome, attempts };

    loop {
        if attempts > 0 && started.elapsed() > config.time_limit {
            debug!(attempts, "backoff time limit reached, giving up");
            return report(BackoffOutcome::TimedOut, attempts);
        }

        // The stop flag is checked under the same lock `stop()` takes, so no
        // invocation can begin after `stop()` returns.
        let pending = {
            let stopped = stopped.lock().unwrap_or_else(PoisonError::into_inner);
            if *stopped {
                return report(BackoffOutcome::Stopped, attempts);
            }
            action()
        };
        attempts = attempts.saturating_add(1);

        match pending.await {
            Attempt::Success => {
                if cancel.is_cancelled() {
                    return report(BackoffOutcome::Stopped, attempts);
                }
                if let Some(callback) = on_success.take() {
                    callback();
                }
                return report(BackoffOutcome::Succeeded, attempts);
            }
            Attempt::Rejected => {
                debug!(attempts, "backoff action rejected, not retrying");
                return report(BackoffOutcome::Rejected, attempts);
            }
            Attempt::Failed => {}
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return report(BackoffOutcome::Stopped, attempts);
            }
            _ = tokio::time::sleep(delay) => {}
        }
        delay = config.next_delay(delay);
    }
}
