//! Startup configuration validation.
//!
//! The gateway refuses to start on an invalid configuration instead of
//! failing lazily on the first request. All problems are collected and
//! reported together so a broken deployment can be fixed in one pass.
use std::net::SocketAddr;

use url::Url;

use crate::config::models::GatewayConfig;

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid backend URL for '{field}': {message}")]
    InvalidBackendUrl { field: String, message: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration.
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        for (field, value) in [
            ("auth_service_url", &config.auth_service_url),
            ("post_service_url", &config.post_service_url),
        ] {
            if let Err(e) = Self::validate_backend_url(field, value) {
                errors.push(e);
            }
        }

        if config.rate_limit.requests == 0 {
            errors.push(ValidationError::InvalidField {
                field: "rate_limit.requests".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if let Err(message) = config.rate_limit.window_duration() {
            errors.push(ValidationError::InvalidField {
                field: "rate_limit.window".to_string(),
                message,
            });
        }

        let breaker = &config.breaker;
        if breaker.error_threshold_percent == 0 || breaker.error_threshold_percent > 100 {
            errors.push(ValidationError::InvalidField {
                field: "breaker.error_threshold_percent".to_string(),
                message: "must be between 1 and 100".to_string(),
            });
        }
        if breaker.min_samples == 0 {
            errors.push(ValidationError::InvalidField {
                field: "breaker.min_samples".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if breaker.reset_timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "breaker.reset_timeout_secs".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if breaker.rolling_window_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "breaker.rolling_window_secs".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if config.upstream.timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "upstream.timeout_secs".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '0.0.0.0:3000')".to_string(),
            });
        }
        Ok(())
    }

    /// A backend base URL must be an absolute http(s) URL with a host.
    fn validate_backend_url(field: &str, value: &str) -> ValidationResult<()> {
        let url = Url::parse(value).map_err(|e| ValidationError::InvalidBackendUrl {
            field: field.to_string(),
            message: e.to_string(),
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ValidationError::InvalidBackendUrl {
                field: field.to_string(),
                message: format!("scheme must be http or https, got '{}'", url.scheme()),
            });
        }
        if url.host_str().is_none() {
            return Err(ValidationError::InvalidBackendUrl {
                field: field.to_string(),
                message: "URL has no host".to_string(),
            });
        }
        Ok(())
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        let messages: Vec<String> = errors.iter().map(|e| format!("  - {e}")).collect();
        format!(
            "{count} configuration error(s):\n{list}",
            count = messages.len(),
            list = messages.join("\n")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::GatewayConfig;

    #[test]
    fn default_config_is_valid() {
        let config = GatewayConfig::default();
        assert!(GatewayConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn rejects_bad_listen_address() {
        let mut config = GatewayConfig::default();
        config.listen_addr = "not-an-address".to_string();
        let err = GatewayConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("not-an-address"));
    }

    #[test]
    fn rejects_missing_scheme_on_backend_url() {
        let mut config = GatewayConfig::default();
        config.auth_service_url = "auth-service:3001".to_string();
        assert!(GatewayConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn rejects_non_http_scheme() {
        let mut config = GatewayConfig::default();
        config.post_service_url = "ftp://post-service:3002".to_string();
        assert!(GatewayConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn collects_multiple_errors() {
        let mut config = GatewayConfig::default();
        config.listen_addr = "bogus".to_string();
        config.rate_limit.requests = 0;
        config.breaker.error_threshold_percent = 0;
        let err = GatewayConfigValidator::validate(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("bogus"));
        assert!(message.contains("rate_limit.requests"));
        assert!(message.contains("breaker.error_threshold_percent"));
    }
}
