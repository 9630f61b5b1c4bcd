use std::{convert::Infallible, future::IntoFuture, net::SocketAddr, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Request},
    http::{HeaderValue, Method, StatusCode, header},
    response::Response,
    routing::any,
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use portico::{
    GatewayService, HttpClient, HttpHandler, UpstreamHttpClient,
    config::{GatewayConfigValidator, load_config},
    metrics, tracing_setup,
    utils::{GracefulShutdown, ShutdownReason},
};
use tower_http::cors::{Any, CorsLayer};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Optional configuration file (TOML/YAML/JSON); environment variables
    /// with the PORTICO_ prefix override it.
    #[clap(short, long)]
    config: Option<String>,
}

fn build_cors_layer(allowed_origins: Option<Vec<String>>) -> Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    match allowed_origins {
        // A wildcard origin cannot be combined with credentials.
        None => Ok(layer.allow_origin(Any)),
        Some(origins) => {
            let origins = origins
                .iter()
                .map(|origin| {
                    origin
                        .parse::<HeaderValue>()
                        .map_err(|e| eyre!("invalid allowed origin '{origin}': {e}"))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(layer.allow_origin(origins).allow_credentials(true))
        }
    }
}

/// Fallback for the handler itself failing. The handler already converts
/// internal errors to its standard JSON shape; this only runs if even that
/// conversion errored, so it builds the same shape from scratch with a fresh
/// request id.
fn last_resort_error_response() -> Response<Body> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let body = serde_json::json!({
        "error": "internal_error",
        "message": "Internal gateway error",
        "requestId": request_id,
    });
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_setup::init_tracing(&config.log)
        .map_err(|e| eyre!("Failed to initialize tracing: {e}"))?;

    // Startup is fail-fast: a misconfigured gateway never starts serving.
    GatewayConfigValidator::validate(&config)
        .map_err(|e| eyre!("Configuration validation failed:\n{e}"))?;

    metrics::init_metrics().map_err(|e| eyre!("Failed to initialize metrics: {e}"))?;

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;
    let grace_period = config.shutdown.grace();
    let cors_layer = build_cors_layer(config.allowed_origin_list())?;

    let http_client: Arc<dyn HttpClient> = Arc::new(
        UpstreamHttpClient::new(config.upstream.timeout())
            .context("Failed to create upstream HTTP client")?,
    );
    let gateway = Arc::new(GatewayService::new(Arc::new(config)));
    let http_handler = Arc::new(HttpHandler::new(gateway.clone(), http_client));

    // Sheds expired rate-limit windows so one-off clients don't accumulate.
    gateway.spawn_limiter_maintenance();

    let graceful_shutdown = Arc::new(GracefulShutdown::new(grace_period));
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let make_request_route = |handler: Arc<HttpHandler>| {
        any(
            move |ConnectInfo(client_addr): ConnectInfo<SocketAddr>, req: Request| {
                let handler = handler.clone();
                async move {
                    match handler.handle_request(req, Some(client_addr)).await {
                        Ok(response) => Ok::<Response<Body>, Infallible>(response),
                        Err(e) => {
                            tracing::error!("Request handling error: {:?}", e);
                            Ok(last_resort_error_response())
                        }
                    }
                }
            },
        )
    };

    let app = Router::new()
        .route("/{*path}", make_request_route(http_handler.clone()))
        .route("/", make_request_route(http_handler.clone()))
        .layer(cors_layer);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!("Portico gateway listening on {}", addr);

    let serve_shutdown = graceful_shutdown.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        serve_shutdown.wait_for_shutdown_signal().await;
        tracing::info!("Stopped accepting connections; draining in-flight requests");
    });
    let mut server_task = tokio::spawn(server.into_future());

    tokio::select! {
        result = &mut server_task => {
            // The accept loop ended before any shutdown signal.
            result.context("Server task panicked")?.context("Server error")?;
            return Ok(());
        }
        reason = graceful_shutdown.wait_for_shutdown_signal() => {
            tracing::info!("Shutdown signal received: {:?}", reason);
        }
    }

    // The drain after the signal is bounded by the grace period.
    let drained = graceful_shutdown
        .drain_within_grace(async {
            match server_task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Server error during drain: {e}"),
                Err(e) => tracing::error!("Server task panicked during drain: {e}"),
            }
        })
        .await;

    match drained {
        ShutdownReason::Graceful => tracing::info!("Graceful shutdown completed"),
        ShutdownReason::Force => tracing::error!(
            grace_secs = grace_period.as_secs(),
            "Grace period exceeded; abandoning remaining in-flight requests"
        ),
    }

    Ok(())
}
