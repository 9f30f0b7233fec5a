//! Host protocol server.
//!
//! Embedded HTTP server exposing the join endpoint on the local network. One
//! tokio task accepts connections; each connection gets its own task, where
//! hyper serves exactly one request without keep-alive and then closes.
//!
//! Lifecycle: `Stopped -> Listening -> Stopped`. [`HostServer::stop`] closes
//! the listener and aborts every in-flight connection without answering it.

pub mod http;
pub mod routes;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::HostConfig;
use crate::events::EventBus;
use crate::registry::SessionRegistry;
use crate::token::{discover_local_ip, ConnectionToken, TokenError};

use self::http::{collect_request, Request, Response};
use self::routes::ApiError;

/// Pause after a failed accept so a persistent error does not spin.
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(50);

/// Errors from the server lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server is already listening on {0}")]
    AlreadyListening(SocketAddr),

    #[error("Server is not listening")]
    NotListening,

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Listening,
}

/// Everything a connection task needs.
struct ConnectionContext {
    registry: Arc<SessionRegistry>,
    bus: EventBus,
    read_timeout: Duration,
    max_request_bytes: usize,
}

/// Live listener state.
struct Running {
    addr: SocketAddr,
    session_id: String,
    registry: Arc<SessionRegistry>,
    shutdown_tx: oneshot::Sender<()>,
    accept_task: JoinHandle<()>,
}

/// Host-side join server.
///
/// The session registry is created on [`start`](Self::start) and discarded on
/// [`stop`](Self::stop). Dropping a listening server also shuts it down.
pub struct HostServer {
    config: HostConfig,
    bus: EventBus,
    running: Option<Running>,
}

impl HostServer {
    pub fn new(config: HostConfig, bus: EventBus) -> Self {
        Self {
            config,
            bus,
            running: None,
        }
    }

    /// Bind `<bind_host>:<port>`, seed `session_id` and begin accepting.
    ///
    /// Port 0 binds an ephemeral port. Returns the bound address.
    pub async fn start(&mut self, session_id: &str, port: u16) -> Result<SocketAddr, ServerError> {
        if let Some(running) = &self.running {
            return Err(ServerError::AlreadyListening(running.addr));
        }

        let bind_addr = format!("{}:{}", self.config.bind_host, port);
        let listener = TcpListener::bind((self.config.bind_host.as_str(), port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: bind_addr,
            source,
        })?;

        let registry = Arc::new(SessionRegistry::new());
        registry.ensure_session(session_id).await;

        let ctx = Arc::new(ConnectionContext {
            registry: registry.clone(),
            bus: self.bus.clone(),
            read_timeout: self.config.read_timeout(),
            max_request_bytes: self.config.max_request_bytes,
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let accept_task = tokio::spawn(accept_loop(listener, ctx, shutdown_rx));

        info!(addr = %addr, session_id = %session_id, "Host server listening");

        self.running = Some(Running {
            addr,
            session_id: session_id.to_string(),
            registry,
            shutdown_tx,
            accept_task,
        });

        Ok(addr)
    }

    /// Close the listener, abort open connections and drop all sessions.
    ///
    /// No-op when already stopped.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown_tx.send(());
        if let Err(e) = running.accept_task.await {
            if e.is_panic() {
                error!(error = %e, "Accept loop panicked");
            }
        }
        running.registry.clear().await;

        info!(addr = %running.addr, "Host server stopped");
    }

    pub fn state(&self) -> ServerState {
        if self.running.is_some() {
            ServerState::Listening
        } else {
            ServerState::Stopped
        }
    }

    /// Bound address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    /// Session registry while listening.
    pub fn registry(&self) -> Option<Arc<SessionRegistry>> {
        self.running.as_ref().map(|r| r.registry.clone())
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Cancel a session; later joins against it get `Session not found`.
    pub async fn cancel_session(&self, session_id: &str) -> bool {
        match &self.running {
            Some(running) => running.registry.remove_session(session_id).await,
            None => false,
        }
    }

    /// Token advertising the session this server was started for.
    ///
    /// Uses the configured advertise address, or the discovered LAN address.
    pub async fn connection_token(&self) -> Result<ConnectionToken, ServerError> {
        let running = self.running.as_ref().ok_or(ServerError::NotListening)?;

        let host = match &self.config.advertise_address {
            Some(address) => address.clone(),
            None => discover_local_ip().await?.to_string(),
        };

        Ok(ConnectionToken::new(
            running.session_id.clone(),
            host,
            running.addr.port(),
            self.config.protocol,
        )?)
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ConnectionContext>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            // Fires on an explicit stop and when the server handle is dropped.
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(handle_connection(stream, peer, ctx.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                }
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!(error = %e, "Connection task panicked");
                    }
                }
            }
        }
    }

    drop(listener);
    let open = connections.len();
    connections.shutdown().await;
    debug!(aborted = open, "Accept loop finished");
}

/// Serve one connection. The deadline covers the whole exchange; a client
/// that has not delivered its request by then is dropped unanswered.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: Arc<ConnectionContext>) {
    let deadline = ctx.read_timeout;
    let service = service_fn(move |request: hyper::Request<Incoming>| {
        let ctx = ctx.clone();
        async move { Ok::<_, Infallible>(serve_request(request, &ctx).await.into_http()) }
    });

    let connection = http1::Builder::new()
        .keep_alive(false)
        .title_case_headers(true)
        .serve_connection(TokioIo::new(stream), service);

    match tokio::time::timeout(deadline, connection).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(peer = %peer, error = %e, "Connection ended with error"),
        Err(_) => debug!(peer = %peer, "Connection timed out"),
    }
}

async fn serve_request(request: hyper::Request<Incoming>, ctx: &ConnectionContext) -> Response {
    match collect_request(request, ctx.max_request_bytes).await {
        Ok(request) => dispatch(&request, ctx).await,
        Err(e) => {
            warn!(error = %e, "Failed to read request");
            Response::from(ApiError::Internal)
        }
    }
}

/// Route a request, turning a panic into a 500.
async fn dispatch(request: &Request, ctx: &ConnectionContext) -> Response {
    let routed = AssertUnwindSafe(routes::handle(request, &ctx.registry, &ctx.bus))
        .catch_unwind()
        .await;

    routed.unwrap_or_else(|_| {
        error!(path = %request.uri(), "Request handler panicked");
        Response::from(ApiError::Internal)
    })
}

#[cfg(test)]
mod tests;
