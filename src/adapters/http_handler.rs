//! The inbound request pipeline.
//!
//! Every request flows context builder → rate limiter → route table →
//! circuit breaker → proxy dispatch, with the correlation id attached to
//! the response and to every log line along the way. Gateway-originated
//! failures (404, 429, 503, 500) all share one JSON body shape:
//! `{error, message, requestId}`. Responses from a reached backend are
//! relayed verbatim, whatever their status.
use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    http::{HeaderMap, StatusCode, Uri, header},
};
use eyre::{Result, WrapErr};
use hyper::{Request, Response};
use tracing::Instrument;

use crate::{
    core::{
        Admission, GatewayService, RequestContext,
        breaker::CallOutcome,
        context::REQUEST_ID_HEADER,
        route_table::RouteEntry,
    },
    metrics,
    ports::http_client::HttpClient,
    tracing_setup,
};

/// Hop-by-hop headers that must not be forwarded to backends.
const HOP_BY_HOP_HEADERS: [&str; 7] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// HTTP handler wiring the gateway core to the upstream client.
#[derive(Clone)]
pub struct HttpHandler {
    gateway: Arc<GatewayService>,
    http_client: Arc<dyn HttpClient>,
}

impl HttpHandler {
    pub fn new(gateway: Arc<GatewayService>, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            gateway,
            http_client,
        }
    }

    /// Handle one inbound request end to end. The returned response always
    /// carries the `X-Request-Id` header.
    pub async fn handle_request(
        &self,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<Body>> {
        let ctx = RequestContext::from_headers(req.headers());
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let span = tracing_setup::request_span(method.as_str(), &path, &ctx.request_id);
        let timer = metrics::RequestTimer::new(&path, method.as_str());

        let mut response = match self.dispatch(req, client_addr, &ctx).instrument(span).await {
            Ok(response) => response,
            // Internal faults still answer with the standard error shape;
            // the detail stays in the server-side log.
            Err(e) => {
                tracing::error!(
                    request_id = %ctx.request_id,
                    error = ?e,
                    "internal error while handling request"
                );
                self.error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal gateway error".to_string(),
                    &ctx,
                )?
            }
        };
        drop(timer);

        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER, ctx.header_value());

        metrics::increment_request_total(&path, method.as_str(), response.status().as_u16());
        tracing::info!(
            request_id = %ctx.request_id,
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            duration_ms = ctx.elapsed().as_millis() as u64,
            "request completed"
        );

        Ok(response)
    }

    async fn dispatch(
        &self,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
        ctx: &RequestContext,
    ) -> Result<Response<Body>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        // Gateway-local endpoints bypass limiter and breakers.
        if method == hyper::Method::GET {
            match path.as_str() {
                "/" => return self.service_info(),
                "/health" => return self.health(),
                _ => {}
            }
        }

        let client_key = Self::client_key(req.headers(), client_addr);
        if let Admission::Limited { retry_after } = self.gateway.admit(&client_key).await {
            metrics::increment_rate_limited(&client_key);
            let retry_secs = retry_after.as_secs().max(1);
            let mut response = self.error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                format!("Too many requests; retry in {retry_secs}s"),
                ctx,
            )?;
            if let Ok(value) = retry_secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            return Ok(response);
        }

        let Some((route, rewritten_path)) = self.gateway.resolve_route(&path) else {
            return self.error_response(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("No route for {method} {path}"),
                ctx,
            );
        };

        let breaker = self
            .gateway
            .breaker_for(&route.name)
            .ok_or_else(|| eyre::eyre!("no circuit breaker for route '{}'", route.name))?;

        // Dropping the permit without an outcome (early return below, or
        // this task being cancelled mid-call) releases it; an abandoned
        // half-open trial frees the slot for the next caller.
        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(rejection) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    route = %route.name,
                    retry_in_secs = rejection.retry_in.as_secs(),
                    "circuit open; rejecting without contacting backend"
                );
                return self.error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "backend_unavailable",
                    format!("{} service is temporarily unavailable", route.name),
                    ctx,
                );
            }
        };

        let outbound = Self::build_outbound(req, &route, &rewritten_path, ctx)?;
        let backend_timer =
            metrics::BackendRequestTimer::new(&route.name, &rewritten_path, method.as_str());
        let result = self.http_client.send_request(outbound).await;
        drop(backend_timer);

        match result {
            Ok(response) => {
                let status = response.status();
                metrics::increment_backend_request_total(&route.name, status.as_u16());

                // Backend-returned statuses are relayed verbatim. Whether a
                // 5xx also counts against the breaker is policy; 4xx never
                // does.
                let outcome = if self.gateway.config().breaker.count_http_5xx
                    && status.is_server_error()
                {
                    CallOutcome::Failure
                } else {
                    CallOutcome::Success
                };
                permit.record(outcome);

                Ok(response)
            }
            Err(e) if e.is_transport_failure() => {
                permit.record(CallOutcome::Failure);
                tracing::error!(
                    request_id = %ctx.request_id,
                    route = %route.name,
                    error = %e,
                    "backend unreachable"
                );
                self.error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "backend_unavailable",
                    format!("{} service is temporarily unavailable", route.name),
                    ctx,
                )
            }
            Err(e) => {
                // A request the gateway itself failed to construct or send;
                // not a statement about backend health.
                tracing::error!(
                    request_id = %ctx.request_id,
                    route = %route.name,
                    error = %e,
                    "failed to dispatch request"
                );
                self.error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal gateway error".to_string(),
                    ctx,
                )
            }
        }
    }

    /// Build the outbound request: same method and body, rewritten target,
    /// hop-by-hop headers stripped, correlation id attached. The
    /// `Authorization` header passes through untouched.
    fn build_outbound(
        req: Request<Body>,
        route: &RouteEntry,
        rewritten_path: &str,
        ctx: &RequestContext,
    ) -> Result<Request<Body>> {
        let (mut parts, body) = req.into_parts();

        let query = parts
            .uri
            .query()
            .map(|q| format!("?{q}"))
            .unwrap_or_default();
        let target = format!("{}{}{}", route.backend_base_url, rewritten_path, query);
        parts.uri = target
            .parse::<Uri>()
            .wrap_err_with(|| format!("failed to build backend URI for route '{}'", route.name))?;

        for name in HOP_BY_HOP_HEADERS {
            parts.headers.remove(name);
        }
        // The client adapter sets Host from the target URI.
        parts.headers.remove(header::HOST);
        parts
            .headers
            .insert(REQUEST_ID_HEADER, ctx.header_value());

        Ok(Request::from_parts(parts, body))
    }

    /// Rate-limit key: first `X-Forwarded-For` hop when present, else the
    /// socket peer address. Requests with neither share one bucket.
    fn client_key(headers: &HeaderMap, client_addr: Option<SocketAddr>) -> String {
        if let Some(forwarded_for) = headers.get("x-forwarded-for")
            && let Ok(value) = forwarded_for.to_str()
            && let Some(first) = value.split(',').next()
        {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }

        client_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// `GET /` — static service metadata.
    fn service_info(&self) -> Result<Response<Body>> {
        let info = serde_json::json!({
            "message": "Portico gateway is running",
            "version": env!("CARGO_PKG_VERSION"),
            "services": self.gateway.route_families(),
        });
        self.json_response(StatusCode::OK, info)
    }

    /// `GET /health` — liveness plus configured backends. Does not call the
    /// backends.
    fn health(&self) -> Result<Response<Body>> {
        let backends: serde_json::Map<String, serde_json::Value> = self
            .gateway
            .backends()
            .into_iter()
            .map(|(family, url)| (family, serde_json::Value::String(url)))
            .collect();
        let breakers: serde_json::Map<String, serde_json::Value> = self
            .gateway
            .breaker_states()
            .into_iter()
            .map(|(route, state)| {
                (route, serde_json::Value::String(state.as_str().to_string()))
            })
            .collect();

        let health = serde_json::json!({
            "status": "ok",
            "backends": backends,
            "breakers": breakers,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.json_response(StatusCode::OK, health)
    }

    fn error_response(
        &self,
        status: StatusCode,
        code: &'static str,
        message: String,
        ctx: &RequestContext,
    ) -> Result<Response<Body>> {
        let body = serde_json::json!({
            "error": code,
            "message": message,
            "requestId": ctx.request_id,
        });
        self.json_response(status, body)
    }

    fn json_response(
        &self,
        status: StatusCode,
        body: serde_json::Value,
    ) -> Result<Response<Body>> {
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .wrap_err("failed to build response")
    }
}
