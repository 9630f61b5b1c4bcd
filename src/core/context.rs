//! Per-request correlation context.
//!
//! Every inbound request gets a request id: either the value of an inbound
//! `X-Request-Id` header (so ids survive hops across services) or a freshly
//! generated UUID. The id is echoed on the response and attached to every
//! log line emitted while the request is handled. Building a context never
//! fails.
use std::time::{Duration, Instant};

use http::{HeaderMap, HeaderValue};
use uuid::Uuid;

/// Header carrying the correlation id in both directions.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation state owned by a single request task.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub started_at: Instant,
}

impl RequestContext {
    /// Build a context from the inbound headers, reusing a propagated id
    /// when one is present and readable.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            request_id,
            started_at: Instant::now(),
        }
    }

    /// Time spent handling the request so far.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// The id as a header value. Generated ids are always valid; a reused
    /// inbound id was already a valid header value.
    pub fn header_value(&self) -> HeaderValue {
        HeaderValue::from_str(&self.request_id)
            .unwrap_or_else(|_| HeaderValue::from_static("invalid-request-id"))
    }
}
