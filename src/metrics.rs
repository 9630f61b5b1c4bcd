//! Lightweight metrics helpers for Portico.
//!
//! This module exposes a small set of convenience functions and RAII timers
//! wrapping the `metrics` crate macros. It intentionally avoids embedding a
//! concrete exporter (the application can initialize any compatible recorder
//! externally) while still documenting and describing Portico-specific
//! metric names.
//!
//! Provided metrics (labels vary by family):
//! * `portico_requests_total` (counter)
//! * `portico_request_duration_seconds` (histogram)
//! * `portico_backend_requests_total` (counter)
//! * `portico_backend_request_duration_seconds` (histogram)
//! * `portico_rate_limited_total` (counter)
//! * `portico_breaker_state` (gauge per route family)
//!
//! The `*Timer` structs leverage `Drop` to record durations safely even when
//! early returns or errors occur.
use std::{collections::HashMap, sync::Mutex, time::Instant};

use metrics::{Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::Lazy;

use crate::core::breaker::BreakerState;

pub const PORTICO_REQUESTS_TOTAL: &str = "portico_requests_total";
pub const PORTICO_REQUEST_DURATION_SECONDS: &str = "portico_request_duration_seconds";
pub const PORTICO_BACKEND_REQUESTS_TOTAL: &str = "portico_backend_requests_total";
pub const PORTICO_BACKEND_REQUEST_DURATION_SECONDS: &str =
    "portico_backend_request_duration_seconds";
pub const PORTICO_RATE_LIMITED_TOTAL: &str = "portico_rate_limited_total";
pub const PORTICO_BREAKER_STATE: &str = "portico_breaker_state"; // 0 closed, 1 half-open, 2 open

/// Last-written breaker gauge values, kept readable for diagnostics and
/// tests. Registration of all metric descriptions piggybacks on first use.
pub static BREAKER_STATE_GAUGES: Lazy<Mutex<HashMap<String, f64>>> = Lazy::new(|| {
    describe_counter!(
        PORTICO_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests processed by the gateway."
    );
    describe_histogram!(
        PORTICO_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests processed by the gateway."
    );
    describe_counter!(
        PORTICO_BACKEND_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests forwarded to backend services."
    );
    describe_histogram!(
        PORTICO_BACKEND_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests forwarded to backend services."
    );
    describe_counter!(
        PORTICO_RATE_LIMITED_TOTAL,
        Unit::Count,
        "Requests rejected by the client rate limiter."
    );
    describe_gauge!(
        PORTICO_BREAKER_STATE,
        "Circuit breaker state per route family (0 closed, 1 half-open, 2 open)."
    );

    Mutex::new(HashMap::new())
});

/// Set (and record) the breaker state gauge for a route family.
pub fn set_breaker_state(route: &str, state: BreakerState) {
    let value = match state {
        BreakerState::Closed => 0.0,
        BreakerState::HalfOpen => 1.0,
        BreakerState::Open => 2.0,
    };

    if let Ok(mut gauges) = BREAKER_STATE_GAUGES.lock() {
        gauges.insert(route.to_string(), value);
    } else {
        tracing::error!("Failed to acquire lock for breaker state gauges");
        return;
    }

    gauge!(PORTICO_BREAKER_STATE, "route" => route.to_string()).set(value);
}

/// Increment the total request counter for an inbound gateway request.
pub fn increment_request_total(path: &str, method: &str, status: u16) {
    counter!(
        PORTICO_REQUESTS_TOTAL,
        "path" => path.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a completed inbound request's duration.
pub fn record_request_duration(path: &str, method: &str, duration: std::time::Duration) {
    histogram!(
        PORTICO_REQUEST_DURATION_SECONDS,
        "path" => path.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Increment total count of proxied backend requests.
pub fn increment_backend_request_total(route: &str, status: u16) {
    counter!(
        PORTICO_BACKEND_REQUESTS_TOTAL,
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a completed backend request duration.
pub fn record_backend_request_duration(
    route: &str,
    path: &str,
    method: &str,
    duration: std::time::Duration,
) {
    histogram!(
        PORTICO_BACKEND_REQUEST_DURATION_SECONDS,
        "route" => route.to_string(),
        "path" => path.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Count one rate-limited rejection.
pub fn increment_rate_limited(client_key: &str) {
    counter!(
        PORTICO_RATE_LIMITED_TOTAL,
        "client" => client_key.to_string()
    )
    .increment(1);
}

/// RAII helper measuring inbound request duration.
pub struct RequestTimer {
    start: Instant,
    path: String,
    method: String,
}

impl RequestTimer {
    pub fn new(path: &str, method: &str) -> Self {
        Self {
            start: Instant::now(),
            path: path.to_string(),
            method: method.to_string(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(&self.path, &self.method, self.start.elapsed());
    }
}

/// RAII helper measuring backend request duration.
pub struct BackendRequestTimer {
    start: Instant,
    route: String,
    path: String,
    method: String,
}

impl BackendRequestTimer {
    pub fn new(route: &str, path: &str, method: &str) -> Self {
        Self {
            start: Instant::now(),
            route: route.to_string(),
            path: path.to_string(),
            method: method.to_string(),
        }
    }
}

impl Drop for BackendRequestTimer {
    fn drop(&mut self) {
        record_backend_request_duration(&self.route, &self.path, &self.method, self.start.elapsed());
    }
}

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    Lazy::force(&BREAKER_STATE_GAUGES);
    tracing::info!("metrics descriptions registered");
    Ok(())
}

/// Snapshot of breaker gauge values for ad-hoc diagnostics.
pub fn breaker_gauge_snapshot() -> HashMap<String, f64> {
    BREAKER_STATE_GAUGES
        .lock()
        .map(|gauges| gauges.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_gauge_tracks_last_state() {
        set_breaker_state("auth-metrics-test", BreakerState::Open);
        assert_eq!(
            breaker_gauge_snapshot().get("auth-metrics-test"),
            Some(&2.0)
        );

        set_breaker_state("auth-metrics-test", BreakerState::Closed);
        assert_eq!(
            breaker_gauge_snapshot().get("auth-metrics-test"),
            Some(&0.0)
        );
    }

    #[test]
    fn timers_record_on_drop() {
        drop(RequestTimer::new("/posts", "GET"));
        drop(BackendRequestTimer::new("posts", "/posts", "GET"));
    }

    #[test]
    fn init_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }
}
