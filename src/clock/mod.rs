//! Tick sources.
//!
//! A clock only reports the current time; it knows nothing about keys or
//! processes. Ticks may arrive late, out of order, or not at all, and every
//! consumer tolerates that.

pub mod local;
pub mod ping;

pub use local::LocalClock;
pub use ping::PingClock;

use crate::config::{ClockConfig, ClockMode};
use crate::error::Result;
use crate::model::Timestamp;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default capacity of the tick channel.
pub const TICK_CHANNEL_CAPACITY: usize = 64;

/// One tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimePassed {
    pub time: Timestamp,
}

/// Create the bounded channel clocks emit into.
pub fn tick_channel(capacity: usize) -> (mpsc::Sender<TimePassed>, mpsc::Receiver<TimePassed>) {
    mpsc::channel(capacity.max(1))
}

/// Why a tick could not be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EmitError {
    /// Consumer is behind; the tick was dropped.
    Full,
    /// Consumer is gone.
    Closed,
}

/// Send without waiting. A full channel drops the tick.
pub(crate) fn emit(
    ticks: &mpsc::Sender<TimePassed>,
    tick: TimePassed,
) -> std::result::Result<(), EmitError> {
    match ticks.try_send(tick) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!(time = %tick.time, "tick channel full, dropping tick");
            Err(EmitError::Full)
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Err(EmitError::Closed),
    }
}

/// A running clock of either kind.
pub enum ClockHandle {
    Local(JoinHandle<()>),
    Ping(PingClock),
}

impl ClockHandle {
    /// Stop the clock without waiting for it.
    pub fn shutdown(&self) {
        match self {
            Self::Local(handle) => handle.abort(),
            Self::Ping(server) => server.shutdown(),
        }
    }
}

/// Start the clock selected by `config`.
///
/// The local clock stops when `cancel` fires; the ping server stops when the
/// handle is shut down or dropped.
///
/// # Errors
///
/// Returns an error when the ping server has no token or cannot bind.
pub async fn spawn_from_config(
    config: &ClockConfig,
    ticks: mpsc::Sender<TimePassed>,
    cancel: CancellationToken,
) -> Result<ClockHandle> {
    match config.mode {
        ClockMode::Local => {
            let clock = LocalClock::new(ticks, cancel).with_interval(config.tick_interval());
            Ok(ClockHandle::Local(tokio::spawn(clock.run())))
        }
        ClockMode::External => {
            let server = PingClock::start(config, ticks).await?;
            Ok(ClockHandle::Ping(server))
        }
    }
}
