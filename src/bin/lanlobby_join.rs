//! lanlobby-join: Join a hosted session
//!
//! ## Usage
//! ```text
//! lanlobby-join '<token-json>' <name>
//! ```
//! Prints the host's response body. Exits non-zero when the host could not
//! be reached or answered with a non-2xx status.
//!
//! ## Configuration
//! - LANLOBBY_CONFIG: Path to a YAML config file (optional)
//! - LANLOBBY_JOIN__TIMEOUT_MS / RETRY_COUNT / BACKOFF_MS: Attempt settings
//! - LANLOBBY_LOG: Log filter (default: info)

use std::process::ExitCode;

use tracing::error;

use lanlobby::client::{JoinClient, JoinOptions};
use lanlobby::config::Config;
use lanlobby::token::ConnectionToken;
use lanlobby::utils::bootstrap::init_tracing;

const USAGE: &str = "usage: lanlobby-join <token-json> <name>";

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let (Some(token_json), Some(name)) = (args.next(), args.next()) else {
        eprintln!("{USAGE}");
        return Ok(ExitCode::from(2));
    };

    let config = Config::load(None)?;
    let token = ConnectionToken::from_json(&token_json)?;
    let client = JoinClient::new(JoinOptions::from(&config.join))?;

    let response = match client.notify_host_player_joined(&token, &name).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Could not reach host");
            return Ok(ExitCode::FAILURE);
        }
    };

    match &response.body {
        Some(body) => println!("{body}"),
        None => println!("{}", response.status),
    }

    if response.ok {
        Ok(ExitCode::SUCCESS)
    } else {
        error!(
            status = response.status,
            error = response.error().unwrap_or("unknown"),
            "Host rejected join"
        );
        Ok(ExitCode::FAILURE)
    }
}
