//! Keyed state machines driven by ticks and domain events.
//!
//! Every machine is a plain struct implementing [`crate::actor::Process`];
//! transitions are pure and unit-tested without any runtime.

pub mod auto_update;
pub mod fetch;
pub mod janitor;
pub mod sessions;
pub mod token_monitor;

pub use auto_update::{AutoUpdateInput, AutoUpdateOutput, AutoUpdatePolicy, AutoUpdateState};
pub use fetch::{FetchInput, FetchOutput, FetchRejection, FetchState};
pub use janitor::{JanitorInput, JanitorOutput, JanitorPolicy, JanitorState};
pub use sessions::{ActiveSessions, SessionInput, SessionOutput};
pub use token_monitor::{
    MonitorPhase, TokenMonitorInput, TokenMonitorOutput, TokenMonitorPolicy, TokenMonitorState,
};

use chrono::TimeDelta;

/// Convert configured seconds into an interval, saturating on overflow.
pub fn interval_secs(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}
