//! The join route.
//!
//! `POST /api/session/{sessionId}/join` with body `{"name": "..."}`.
//! Everything else is a 404.

use http::{Method, StatusCode};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::http::{Request, Response};
use crate::events::{EventBus, PlayerJoined, PLAYER_JOINED};
use crate::registry::SessionRegistry;

const JOIN_PREFIX: &str = "/api/session/";
const JOIN_SUFFIX: &str = "/join";

/// Failures surfaced to the remote caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Not found")]
    NotFound,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Invalid JSON")]
    InvalidJson,

    #[error("Missing player name")]
    MissingPlayerName,

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound | ApiError::SessionNotFound => StatusCode::NOT_FOUND,
            ApiError::InvalidJson | ApiError::MissingPlayerName => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
}

#[derive(Serialize)]
struct JoinBody<'a> {
    ok: bool,
    players: &'a [String],
}

impl From<ApiError> for Response {
    fn from(err: ApiError) -> Self {
        Response::json(
            err.status(),
            &ErrorBody {
                ok: false,
                error: err.to_string(),
            },
        )
    }
}

/// Extract the decoded session id if `method`/`path` is the join route.
pub fn match_join_route(method: &Method, path: &str) -> Option<String> {
    if *method != Method::POST {
        return None;
    }
    let segment = path.strip_prefix(JOIN_PREFIX)?.strip_suffix(JOIN_SUFFIX)?;
    if segment.is_empty() || segment.contains('/') {
        return None;
    }
    percent_decode_str(segment)
        .decode_utf8()
        .ok()
        .map(|id| id.into_owned())
}

/// Pull a non-empty string `name` out of a JSON body.
fn player_name(body: &Value) -> Option<&str> {
    body.get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
}

/// Route one request.
pub async fn handle(request: &Request, registry: &SessionRegistry, bus: &EventBus) -> Response {
    debug!(method = %request.method(), path = %request.uri(), "Incoming request");

    let Some(session_id) = match_join_route(request.method(), request.uri().path()) else {
        return ApiError::NotFound.into();
    };

    match join(&session_id, request.body(), registry, bus).await {
        Ok(players) => Response::json(
            StatusCode::OK,
            &JoinBody {
                ok: true,
                players: &players,
            },
        ),
        Err(err) => err.into(),
    }
}

async fn join(
    session_id: &str,
    body: &[u8],
    registry: &SessionRegistry,
    bus: &EventBus,
) -> Result<Vec<String>, ApiError> {
    if !registry.contains(session_id).await {
        return Err(ApiError::SessionNotFound);
    }

    let body: Value = serde_json::from_slice(body).map_err(|_| ApiError::InvalidJson)?;
    let name = player_name(&body).ok_or(ApiError::MissingPlayerName)?;

    let outcome = registry.try_add_participant(session_id, name).await;
    if !outcome.accepted {
        // Cancelled between the lookup and the append.
        return Err(ApiError::SessionNotFound);
    }

    info!(
        session_id = %session_id,
        player = %name,
        new = outcome.added,
        players = outcome.participants.len(),
        "Player joined"
    );

    notify_joined(bus, name);

    Ok(outcome.participants)
}

/// Publish `playerJoined` without waiting for subscribers.
fn notify_joined(bus: &EventBus, name: &str) {
    let bus = bus.clone();
    let event = PlayerJoined {
        name: name.to_string(),
    };
    tokio::task::spawn_blocking(move || {
        bus.publish_event(PLAYER_JOINED, &event);
    });
}
