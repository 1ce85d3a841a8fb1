//! In-process free-running clock.

use super::{EmitError, TimePassed, emit};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Emits the current time every `interval` until cancelled.
///
/// Ticks missed while the runtime was busy are skipped, not replayed.
pub struct LocalClock {
    ticks: mpsc::Sender<TimePassed>,
    cancel: CancellationToken,
    interval: Duration,
}

impl LocalClock {
    /// Create a clock ticking once per second.
    ///
    /// Call [`run`](Self::run) to start it.
    pub fn new(ticks: mpsc::Sender<TimePassed>, cancel: CancellationToken) -> Self {
        Self {
            ticks,
            cancel,
            interval: Duration::from_secs(1),
        }
    }

    /// Override the tick period. A zero period is raised to one millisecond.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Run until the token is cancelled or the receiver is dropped.
    ///
    /// ```rust,ignore
    /// let clock = LocalClock::new(ticks_tx, cancel.child_token());
    /// tokio::spawn(clock.run());
    /// ```
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_ms = self.interval.as_millis(), "local clock started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("local clock cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let tick = TimePassed { time: Utc::now() };
                    if emit(&self.ticks, tick) == Err(EmitError::Closed) {
                        warn!("local clock: tick receiver closed, stopping");
                        break;
                    }
                }
            }
        }
    }
}
