//! Core gateway orchestration service.
//!
//! The `GatewayService` aggregates immutable configuration with the shared
//! runtime state every request touches: the static route table, the circuit
//! breaker bank and the client rate limiter. It provides:
//! * Longest‑prefix route resolution with path rewriting
//! * Breaker lookup per route family
//! * Rate-limit admission per client key
//!
//! This layer deliberately avoids I/O and only manipulates in‑memory data so
//! it remains fast and easily testable in isolation.
use std::sync::Arc;

use crate::{
    config::GatewayConfig,
    core::{
        breaker::{BreakerBank, CircuitBreaker},
        rate_limiter::{Admission, ClientRateLimiter},
        route_table::{RouteEntry, RouteTable},
    },
};

/// Central orchestrator for routing, circuit breaking and rate limiting.
///
/// Construct with [`GatewayService::new`] by passing an `Arc<GatewayConfig>`.
/// All shared state is pre-built here so the request hot path performs no
/// allocation beyond the rewritten path string.
pub struct GatewayService {
    config: Arc<GatewayConfig>,
    routes: RouteTable,
    breakers: BreakerBank,
    rate_limiter: ClientRateLimiter,
}

impl GatewayService {
    /// Create a new gateway service from a validated configuration.
    ///
    /// Panics never: startup validation already rejected the configurations
    /// that could fail limiter construction.
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        let routes = RouteTable::from_config(&config);
        let breakers = BreakerBank::new(&routes.family_names(), config.breaker);
        let rate_limiter = ClientRateLimiter::from_config(&config.rate_limit)
            .unwrap_or_else(|e| {
                tracing::error!("rate limiter config invalid after validation: {e}");
                ClientRateLimiter::from_config(&Default::default())
                    .expect("default rate limit config is valid")
            });

        for (family, backend) in routes.backends() {
            tracing::info!(route = %family, backend = %backend, "configured route family");
        }

        Self {
            config,
            routes,
            breakers,
            rate_limiter,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Resolve an inbound path to its route entry and rewritten backend path.
    pub fn resolve_route(&self, path: &str) -> Option<(Arc<RouteEntry>, String)> {
        self.routes.resolve(path)
    }

    /// The breaker guarding a route family.
    pub fn breaker_for(&self, route: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(route)
    }

    /// Rate-limit admission for one request from `client_key`.
    pub async fn admit(&self, client_key: &str) -> Admission {
        self.rate_limiter.admit(client_key).await
    }

    /// Route family names served by this gateway.
    pub fn route_families(&self) -> Vec<String> {
        self.routes.family_names()
    }

    /// (family, backend base URL) pairs for the health endpoint.
    pub fn backends(&self) -> Vec<(String, String)> {
        self.routes.backends()
    }

    /// Breaker state snapshot for diagnostics.
    pub fn breaker_states(&self) -> Vec<(String, crate::core::breaker::BreakerState)> {
        self.breakers.states()
    }

    /// Access the limiter directly (maintenance tasks, tests).
    pub fn rate_limiter(&self) -> &ClientRateLimiter {
        &self.rate_limiter
    }

    /// Spawn the background task that periodically drops expired rate-limit
    /// windows. A window older than one window length can never influence
    /// admission again, so sweeping once per window length bounds the
    /// limiter's memory to clients seen within the last two windows.
    pub fn spawn_limiter_maintenance(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(gateway.rate_limiter.window());
            // The first tick completes immediately; skip it.
            interval.tick().await;
            loop {
                interval.tick().await;
                gateway.rate_limiter.evict_expired().await;
                tracing::debug!(
                    tracked_clients = gateway.rate_limiter.tracked_clients(),
                    "evicted expired rate-limit windows"
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::breaker::BreakerState;

    fn service() -> GatewayService {
        GatewayService::new(Arc::new(GatewayConfig::default()))
    }

    #[test]
    fn every_route_family_has_a_breaker() {
        let gateway = service();
        for family in gateway.route_families() {
            assert!(gateway.breaker_for(&family).is_some(), "missing breaker for {family}");
        }
    }

    #[test]
    fn breakers_start_closed() {
        let gateway = service();
        for (_, state) in gateway.breaker_states() {
            assert_eq!(state, BreakerState::Closed);
        }
    }

    #[tokio::test]
    async fn admission_uses_configured_limit() {
        let mut config = GatewayConfig::default();
        config.rate_limit.requests = 2;
        config.rate_limit.window = "1m".to_string();
        let gateway = GatewayService::new(Arc::new(config));

        assert!(gateway.admit("198.51.100.7").await.is_allowed());
        assert!(gateway.admit("198.51.100.7").await.is_allowed());
        assert!(!gateway.admit("198.51.100.7").await.is_allowed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn maintenance_task_sheds_expired_windows() {
        let mut config = GatewayConfig::default();
        config.rate_limit.requests = 5;
        config.rate_limit.window = "30ms".to_string();
        let gateway = Arc::new(GatewayService::new(Arc::new(config)));

        gateway.admit("198.51.100.9").await;
        gateway.admit("198.51.100.10").await;
        assert_eq!(gateway.rate_limiter().tracked_clients(), 2);

        let maintenance = gateway.spawn_limiter_maintenance();
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert_eq!(gateway.rate_limiter().tracked_clients(), 0);
        maintenance.abort();
    }

    #[test]
    fn resolve_goes_through_route_table() {
        let gateway = service();
        let (entry, rewritten) = gateway.resolve_route("/api/v1/auth/login").unwrap();
        assert_eq!(entry.name, "auth");
        assert_eq!(rewritten, "/auth/login");
    }
}
