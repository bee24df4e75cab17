//! Integration test binary -- all integration tests consolidated into a single
//! binary to keep link time down.
//!
//! See the matklad pattern: <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

mod end_to_end;
mod preemption_flow;
mod scheduler_flow;
mod synthesis_retry;
