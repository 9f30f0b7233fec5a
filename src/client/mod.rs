//! Join client.
//!
//! Runs on a prospective participant's device: posts the participant's name to
//! the host advertised by a [`ConnectionToken`] and reports the host's answer.
//!
//! Each attempt races a deadline. Connection-level failures and timeouts are
//! retried on a fixed backoff; any HTTP response, whatever its status, ends
//! the call.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::Retryable;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::JoinConfig;
use crate::token::ConnectionToken;
use crate::utils::retry::join_backoff;

/// Default per-attempt deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);
/// Default retries after the first attempt.
pub const DEFAULT_RETRY_COUNT: u32 = 1;
/// Default pause between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(150);

/// Timeout and retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOptions {
    /// Deadline for one attempt (connect, send and read the response).
    pub timeout: Duration,
    /// Retries after the first attempt; total attempts = `retry_count + 1`.
    pub retry_count: u32,
    /// Fixed pause between a failed attempt and the next.
    pub backoff: Duration,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl From<&JoinConfig> for JoinOptions {
    fn from(config: &JoinConfig) -> Self {
        Self {
            timeout: config.timeout(),
            retry_count: config.retry_count,
            backoff: config.backoff(),
        }
    }
}

/// The host's answer to a join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinResponse {
    /// Whether `status` is 2xx.
    pub ok: bool,
    pub status: u16,
    /// Response body, when it parsed as JSON.
    pub body: Option<Value>,
}

impl JoinResponse {
    /// `players` from the body of an accepted join.
    pub fn players(&self) -> Option<Vec<String>> {
        let players = self.body.as_ref()?.get("players")?.as_array()?;
        players
            .iter()
            .map(|p| p.as_str().map(str::to_string))
            .collect()
    }

    /// `error` from the body of a rejected join.
    pub fn error(&self) -> Option<&str> {
        self.body.as_ref()?.get("error")?.as_str()
    }
}

/// Failure of a single attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Terminal join failures.
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    /// Every attempt failed at the transport level.
    #[error("Network error after {attempts} attempt(s): {source}")]
    Network {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("Invalid host address in token: {0}")]
    InvalidToken(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

#[derive(Serialize)]
struct JoinRequest<'a> {
    name: &'a str,
}

/// Client for the host's join endpoint.
#[derive(Debug, Clone)]
pub struct JoinClient {
    http: Client,
    options: JoinOptions,
}

impl JoinClient {
    /// Hosts live on the local network, so system proxies are bypassed.
    pub fn new(options: JoinOptions) -> Result<Self, JoinError> {
        let http = Client::builder()
            .no_proxy()
            .build()
            .map_err(JoinError::Client)?;
        Ok(Self { http, options })
    }

    /// Use an existing reqwest client.
    pub fn with_client(http: Client, options: JoinOptions) -> Self {
        Self { http, options }
    }

    pub fn options(&self) -> &JoinOptions {
        &self.options
    }

    /// Tell the host that `participant_name` wants to join.
    ///
    /// Returns the host's response for any HTTP status. Fails with
    /// [`JoinError::Network`] only when every attempt failed to get one.
    pub async fn notify_host_player_joined(
        &self,
        token: &ConnectionToken,
        participant_name: &str,
    ) -> Result<JoinResponse, JoinError> {
        let url = Url::parse(&token.join_url()).map_err(|e| JoinError::InvalidToken(e.to_string()))?;
        let body = JoinRequest {
            name: participant_name,
        };
        let attempts = AtomicU32::new(0);

        let result = (|| async { self.attempt(&url, &body, &attempts).await })
            .retry(join_backoff(self.options.backoff, self.options.retry_count))
            .notify(|err: &TransportError, delay: Duration| {
                warn!(
                    url = %url,
                    error = %err,
                    retry_in = ?delay,
                    "Join attempt failed, retrying"
                );
            })
            .await;

        let attempts = attempts.load(Ordering::SeqCst);
        match result {
            Ok(response) => {
                info!(
                    url = %url,
                    status = response.status,
                    attempts = attempts,
                    "Host answered join"
                );
                Ok(response)
            }
            Err(source) => {
                warn!(url = %url, attempts = attempts, error = %source, "Join failed");
                Err(JoinError::Network { attempts, source })
            }
        }
    }

    /// One request raced against the deadline. Dropping the timed-out
    /// future discards whatever the request would have produced.
    async fn attempt(
        &self,
        url: &Url,
        body: &JoinRequest<'_>,
        attempts: &AtomicU32,
    ) -> Result<JoinResponse, TransportError> {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(url = %url, attempt = attempt, "Sending join");

        let request = async {
            let response = self.http.post(url.clone()).json(body).send().await?;
            let status = response.status();
            // Body problems do not fail the attempt; the status stands.
            let body = match response.bytes().await {
                Ok(bytes) => serde_json::from_slice::<Value>(&bytes).ok(),
                Err(e) => {
                    debug!(error = %e, "Failed to read join response body");
                    None
                }
            };
            Ok::<_, reqwest::Error>(JoinResponse {
                ok: status.is_success(),
                status: status.as_u16(),
                body,
            })
        };

        match tokio::time::timeout(self.options.timeout, request).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TransportError::Timeout(self.options.timeout)),
        }
    }
}

/// One-shot join with a fresh client.
pub async fn notify_host_player_joined(
    token: &ConnectionToken,
    participant_name: &str,
    options: Option<JoinOptions>,
) -> Result<JoinResponse, JoinError> {
    JoinClient::new(options.unwrap_or_default())?
        .notify_host_player_joined(token, participant_name)
        .await
}
