//! Configuration loading.
//!
//! Configuration is read exactly once at startup. Two layered sources feed
//! the same [`GatewayConfig`] shape: an optional configuration file (TOML,
//! YAML or JSON, detected by extension) and `PORTICO_*` environment
//! variables, with the environment taking precedence. Nested fields use a
//! double underscore, e.g. `PORTICO_RATE_LIMIT__REQUESTS=50`.
use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

const ENV_PREFIX: &str = "PORTICO";

/// Load configuration from the environment, optionally layered on top of a
/// configuration file.
pub fn load_config(config_path: Option<&str>) -> Result<GatewayConfig> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        let config_path = Path::new(path);

        let format = match config_path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            Some("toml") => FileFormat::Toml,
            _ => FileFormat::Toml,
        };

        builder = builder.add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ));
    }

    let settings = builder
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .context("Failed to build configuration sources")?;

    let gateway_config: GatewayConfig = settings
        .try_deserialize()
        .context("Failed to deserialize gateway configuration")?;

    Ok(gateway_config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_load_defaults_without_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:3000");
        assert_eq!(config.rate_limit.requests, 100);
    }

    #[test]
    fn test_load_toml_config() {
        let toml_content = r#"
listen_addr = "127.0.0.1:8080"
auth_service_url = "http://127.0.0.1:3001"
post_service_url = "http://127.0.0.1:3002"
allowed_origins = "http://localhost:5173"

[rate_limit]
requests = 20
window = "1m"

[breaker]
error_threshold_percent = 40
count_http_5xx = true
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = load_config(Some(temp_file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.auth_service_url, "http://127.0.0.1:3001");
        assert_eq!(config.rate_limit.requests, 20);
        assert_eq!(config.breaker.error_threshold_percent, 40);
        assert!(config.breaker.count_http_5xx);
        // Unspecified fields keep their defaults.
        assert_eq!(config.breaker.reset_timeout_secs, 30);
        assert_eq!(config.upstream.timeout_secs, 10);
    }

    #[test]
    fn test_load_yaml_config() {
        let yaml_content = r#"
listen_addr: "127.0.0.1:9000"
upstream:
  timeout_secs: 5
shutdown:
  grace_secs: 3
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config(Some(temp_file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.upstream.timeout_secs, 5);
        assert_eq!(config.shutdown.grace_secs, 3);
    }
}
