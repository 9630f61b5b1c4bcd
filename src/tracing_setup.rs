use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogConfig;

/// Initialize structured logging from the gateway's log configuration.
///
/// `RUST_LOG` overrides the configured level when set. JSON output is for
/// production; the pretty formatter is for local development.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(&config.level)
            .wrap_err_with(|| format!("Invalid log level: {}", config.level))
    })?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    if config.json {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(false)
                    .with_span_list(true),
            )
            .init();
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .init();
    }

    tracing::info!(
        level = %config.level,
        json = config.json,
        "structured logging initialized"
    );
    Ok(())
}

/// Create a request-scoped tracing span carrying the correlation id.
pub fn request_span(method: &str, path: &str, request_id: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = path,
        request.id = request_id,
        http.status_code = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}
