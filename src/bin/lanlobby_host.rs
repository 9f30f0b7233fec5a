//! lanlobby-host: Host a session on the local network
//!
//! Starts the join server, prints the connection token JSON to stdout and
//! logs every participant that joins until interrupted.
//!
//! ## Usage
//! ```text
//! lanlobby-host [session-id]
//! ```
//! A `session-<millis>` id is generated when none is given.
//!
//! ## Configuration
//! - LANLOBBY_CONFIG: Path to a YAML config file (optional)
//! - LANLOBBY_HOST__PORT: Listening port (default: 8080)
//! - LANLOBBY_HOST__ADVERTISE_ADDRESS: Address put in the token (default: discovered)
//! - LANLOBBY_LOG: Log filter (default: info)

use tracing::info;

use lanlobby::config::Config;
use lanlobby::events::{EventBus, PlayerJoined, PLAYER_JOINED};
use lanlobby::server::HostServer;
use lanlobby::token::generate_session_id;
use lanlobby::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;
    let session_id = std::env::args().nth(1).unwrap_or_else(generate_session_id);

    let bus = EventBus::new();
    let _joined = bus.subscribe_event(PLAYER_JOINED, |event: PlayerJoined| {
        info!(name = %event.name, "Participant joined");
        Ok(())
    });

    let port = config.host.port;
    let mut server = HostServer::new(config.host, bus);
    let addr = server.start(&session_id, port).await?;
    let token = server.connection_token().await?;

    info!(addr = %addr, session_id = %session_id, "lanlobby-host started");
    println!("{}", token.to_json()?);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    server.stop().await;

    Ok(())
}
