//! Bootstrap utilities for lanlobby binaries.
//!
//! Shared initialization code for the host and join binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the LANLOBBY_LOG environment variable.
///
/// Defaults to "info" level if LANLOBBY_LOG is not set. Logs go to stderr so
/// stdout stays free for the token and response output.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
