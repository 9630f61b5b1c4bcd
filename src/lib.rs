//! Portico - an edge gateway for the blog microservices.
//!
//! Portico sits in front of the auth and post services and implements a
//! **hexagonal architecture**: business logic lives in `core`, the outbound
//! HTTP port is a trait in `ports`, and the Hyper client plus the Axum
//! request pipeline are `adapters`. This library exposes the building blocks
//! so the gateway can be embedded or tested without a running server.
//!
//! # Features
//! - Longest-prefix routing with versioned (`/api/v1/...`) and legacy path
//!   support, rewriting paths before they reach a backend
//! - Per-route-family circuit breaking (closed / open / half-open with a
//!   single trial request)
//! - Fixed-window client rate limiting keyed by caller identity
//! - Request-id correlation across inbound request, backend call, response
//!   and every log line
//! - Structured tracing via `tracing` and `metrics`-style counters
//! - Graceful shutdown with a bounded drain period
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use portico::{GatewayService, config::load_config};
//!
//! # fn main() -> eyre::Result<()> {
//! let cfg = load_config(None)?;
//! let gateway = Arc::new(GatewayService::new(Arc::new(cfg)));
//! // Wire this into the HttpHandler adapter (see the binary crate).
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Fallible APIs return `eyre::Result<T>` or a domain-specific error type.
//! Context is attached with `WrapErr` for debuggability.
//!
//! # Concurrency & Data Structures
//! Shared mutable maps use `scc::HashMap` for predictable performance under
//! contention; breaker state machines serialize transitions with a plain
//! mutex.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{HttpHandler, UpstreamHttpClient},
    core::GatewayService,
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
