//! Lanlobby - local-network session joining
//!
//! A host device advertises a session through a connection token and accepts
//! participants over a small HTTP endpoint; joining devices post their name
//! and receive the current roster.

pub mod client;
pub mod config;
pub mod events;
pub mod registry;
pub mod server;
pub mod token;
pub mod utils;
