//! Configuration data structures for Portico.
//!
//! These types map to TOML / YAML / JSON configuration files as well as
//! `PORTICO_*` environment variables. They are intentionally serde‑friendly
//! and carry defaults so that a bare environment still produces a runnable
//! gateway pointed at the default backend service names.
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Logging configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    /// Log verbosity, an `EnvFilter` directive (e.g. "info", "portico=debug").
    pub level: String,
    /// Emit JSON log lines instead of the pretty console format.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Per-client rate limiting policy. One window per client key, shared by all
/// routes.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum requests allowed per client key within one window.
    pub requests: u64,
    /// Window length as a humantime string (e.g. "15m", "30s").
    pub window: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            window: "15m".to_string(),
        }
    }
}

impl RateLimitConfig {
    /// Parse the configured window string.
    pub fn window_duration(&self) -> Result<Duration, String> {
        humantime::parse_duration(&self.window)
            .map_err(|e| format!("invalid rate limit window '{}': {e}", self.window))
    }
}

/// Circuit breaker policy applied to every backend route.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failure percentage within the rolling window that trips the breaker.
    pub error_threshold_percent: u8,
    /// Minimum outcomes in the window before the failure ratio is considered
    /// meaningful.
    pub min_samples: u32,
    /// Seconds an open breaker waits before allowing one trial request.
    pub reset_timeout_secs: u64,
    /// Length of the rolling window over which outcomes are counted.
    pub rolling_window_secs: u64,
    /// Count backend-returned 5xx statuses as breaker failures in addition
    /// to transport failures. 4xx never counts.
    pub count_http_5xx: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold_percent: 50,
            min_samples: 10,
            reset_timeout_secs: 30,
            rolling_window_secs: 10,
            count_http_5xx: false,
        }
    }
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }

    pub fn rolling_window(&self) -> Duration {
        Duration::from_secs(self.rolling_window_secs)
    }
}

/// Outbound call configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Per-call timeout for backend requests, in seconds.
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Seconds in-flight requests get to finish after a termination signal.
    pub grace_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_secs: 10 }
    }
}

impl ShutdownConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

/// Top-level gateway configuration, loaded once at startup.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the gateway listens on.
    pub listen_addr: String,
    /// Base URL of the identity/credential service.
    pub auth_service_url: String,
    /// Base URL of the content service (posts and categories).
    pub post_service_url: String,
    /// Comma-separated list of allowed CORS origins, or "*" for any.
    pub allowed_origins: String,
    pub log: LogConfig,
    pub rate_limit: RateLimitConfig,
    pub breaker: BreakerConfig,
    pub upstream: UpstreamConfig,
    pub shutdown: ShutdownConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            auth_service_url: "http://auth-service:3001".to_string(),
            post_service_url: "http://post-service:3002".to_string(),
            allowed_origins: "*".to_string(),
            log: LogConfig::default(),
            rate_limit: RateLimitConfig::default(),
            breaker: BreakerConfig::default(),
            upstream: UpstreamConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// The configured CORS origins. `None` means any origin is allowed.
    pub fn allowed_origin_list(&self) -> Option<Vec<String>> {
        let trimmed = self.allowed_origins.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return None;
        }
        Some(
            trimmed
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_service_names() {
        let config = GatewayConfig::default();
        assert_eq!(config.auth_service_url, "http://auth-service:3001");
        assert_eq!(config.post_service_url, "http://post-service:3002");
        assert_eq!(config.rate_limit.requests, 100);
        assert_eq!(
            config.rate_limit.window_duration().unwrap(),
            Duration::from_secs(15 * 60)
        );
        assert_eq!(config.breaker.error_threshold_percent, 50);
        assert_eq!(config.breaker.reset_timeout(), Duration::from_secs(30));
        assert_eq!(config.upstream.timeout(), Duration::from_secs(10));
        assert_eq!(config.shutdown.grace(), Duration::from_secs(10));
    }

    #[test]
    fn origin_list_parsing() {
        let mut config = GatewayConfig::default();
        assert!(config.allowed_origin_list().is_none());

        config.allowed_origins = "http://localhost:5173, http://blog.local".to_string();
        let origins = config.allowed_origin_list().unwrap();
        assert_eq!(origins, vec!["http://localhost:5173", "http://blog.local"]);
    }

    #[test]
    fn invalid_window_string_is_reported() {
        let config = RateLimitConfig {
            requests: 10,
            window: "soon".to_string(),
        };
        assert!(config.window_duration().is_err());
    }
}
