//! mentions-sync: time-driven coordination core for GitHub mention tracking.
//!
//! A set of independently keyed, persistent state machines react to a shared
//! periodic tick and to domain events, and decide when to refresh access
//! tokens, re-fetch mentions, and purge archived storage. Each decision is
//! idempotent, so duplicate or late ticks never trigger work twice.
//!
//! # Architecture
//!
//! - **Clock**: [`clock::LocalClock`] or [`clock::PingClock`] emit ticks
//! - **Hub**: [`SyncHub`] fans ticks out and routes commands between kinds
//! - **Actors**: one task per key applies a pure [`actor::Process`] transition
//! - **Store**: per-kind state survives restarts via [`store::JsonFileStore`]
//! - **Client**: [`MentionsClient`] polls for a refresh with [`backoff`]

pub mod actor;
pub mod backoff;
pub mod client;
pub mod clock;
pub mod collab;
pub mod config;
pub mod error;
pub mod events;
pub mod hub;
pub mod model;
pub mod process;
pub mod store;

pub use backoff::{Attempt, BackoffConfig, BackoffOutcome, BackoffReport, BackoffRetrier};
pub use client::{MentionsClient, PendingRefresh};
pub use collab::Collaborators;
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use events::SyncEvent;
pub use hub::{FetchDecision, HubStores, SessionVerdict, SyncHub};
pub use model::{ClientKey, IssuedToken, JanitorScope, Mention, Secret, SessionId, UserScope};
