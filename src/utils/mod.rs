//! Shared helpers.
//!
//! Process bootstrap and backoff policies used across the daemon.

pub mod bootstrap;
pub mod retry;
