//! HTTP message types for the host endpoint.
//!
//! Framing is hyper's job. This module turns an incoming hyper request into a
//! [`Request`] with a fully buffered, size-limited body, and turns the JSON
//! [`Response`] produced by the routes into a hyper response.

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_TYPE};
use http::{HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

/// A request whose body has been read in full.
pub type Request = http::Request<Bytes>;

/// Boxed error as produced by body implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures reading a request body.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("Request body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Failed to read request body: {0}")]
    Read(#[source] BoxError),
}

/// Buffer the body of `request`, failing once more than `limit` bytes arrive.
pub async fn collect_request<B>(request: http::Request<B>, limit: usize) -> Result<Request, BodyError>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let (parts, body) = request.into_parts();
    let collected = Limited::new(body, limit).collect().await.map_err(|e| {
        if e.downcast_ref::<LengthLimitError>().is_some() {
            BodyError::TooLarge { limit }
        } else {
            BodyError::Read(e)
        }
    })?;
    Ok(Request::from_parts(parts, collected.to_bytes()))
}

/// A JSON response, always sent with `Connection: close`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub body: Value,
}

impl Response {
    /// Serialize `body`. A body that fails to serialize becomes a 500.
    pub fn json<T: Serialize>(status: StatusCode, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status, body },
            Err(e) => {
                error!(status = %status, error = %e, "Failed to serialize response body");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: json!({"ok": false, "error": "Internal server error"}),
                }
            }
        }
    }

    pub fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut response = http::Response::new(Full::new(Bytes::from(self.body.to_string())));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
        response
    }
}
