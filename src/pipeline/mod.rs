//! Top-level orchestration of the live-interaction core.

pub mod coordinator;

pub use coordinator::{LiveCore, LiveStatus, Services};
