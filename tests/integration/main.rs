//! Integration test binary -- all integration tests consolidated into a single
//! binary to keep link time down.

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod helpers;

mod client_polling;
mod fetch_flow;
mod janitor_purge;
mod ping_clock;
mod restart_recovery;
