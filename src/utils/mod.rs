//! Shared helpers for the binaries and the join client.

pub mod bootstrap;
pub mod retry;
