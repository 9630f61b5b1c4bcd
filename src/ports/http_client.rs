//! The outbound HTTP port.
//!
//! The request pipeline talks to backends only through this trait, which
//! keeps the dispatch logic testable with a scripted client. Failures are a
//! tagged result rather than callbacks: the handler matches on the variant
//! once and the breaker consumes the same classification.
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use hyper::{Request, Response};
use thiserror::Error;

/// Failure classification for one outbound dispatch.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DispatchError {
    /// Connection-level failure: refused, reset, DNS resolution failure.
    /// The message is for server-side logs only and is never forwarded to
    /// the client.
    #[error("connection error: {0}")]
    Connect(String),

    /// The backend did not answer within the per-call timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The outbound request could not be constructed.
    #[error("invalid outbound request: {0}")]
    InvalidRequest(String),
}

impl DispatchError {
    /// Whether this failure counts as backend unreachability for breaker
    /// accounting. Malformed requests are a gateway fault, not a backend
    /// one.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, DispatchError::Connect(_) | DispatchError::Timeout(_))
    }
}

/// Result type alias for outbound dispatch.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// HttpClient defines the port (interface) for forwarding requests to
/// backend services.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send a fully-built request to a backend and return its response.
    /// A returned response means the backend was reached, whatever its
    /// status code; errors mean it was not.
    async fn send_request(&self, req: Request<Body>) -> DispatchResult<Response<Body>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_classification() {
        assert!(DispatchError::Connect("refused".into()).is_transport_failure());
        assert!(DispatchError::Timeout(Duration::from_secs(10)).is_transport_failure());
        assert!(!DispatchError::InvalidRequest("bad uri".into()).is_transport_failure());
    }
}
