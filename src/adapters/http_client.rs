//! HTTP/1.1 client adapter using Hyper with Rustls.
//!
//! Responsibilities:
//! * Sets the Host header from the target URI
//! * Pins the request version to HTTP/1.1, the only version the connector
//!   speaks
//! * Applies the fixed per-call timeout
//! * Classifies failures into the [`DispatchError`] taxonomy
//!
//! Retry and circuit breaking live above this adapter; it performs exactly
//! one attempt per call.
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use eyre::Result;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::ports::http_client::{DispatchError, DispatchResult, HttpClient};

/// Outbound client shared by every request task.
pub struct UpstreamHttpClient {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    call_timeout: Duration,
}

impl UpstreamHttpClient {
    /// Create a new upstream client with the given per-call timeout.
    pub fn new(call_timeout: Duration) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::debug!("Loaded {} native root certificates", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, Body>(https_connector);

        tracing::info!(
            timeout_secs = call_timeout.as_secs(),
            "created upstream HTTP client"
        );
        Ok(Self {
            client,
            call_timeout,
        })
    }

    /// Set the Host header from the target URI so backends behind virtual
    /// hosting answer correctly.
    fn set_host_header(req: &mut Request<Body>) -> DispatchResult<()> {
        let Some(host_str) = req.uri().host() else {
            return Err(DispatchError::InvalidRequest(
                "outgoing URI has no host".to_string(),
            ));
        };

        let host_header_val = if let Some(port) = req.uri().port() {
            HeaderValue::from_str(&format!("{host_str}:{}", port.as_u16()))
        } else {
            HeaderValue::from_str(host_str)
        }
        .map_err(|e| DispatchError::InvalidRequest(format!("invalid host header: {e}")))?;

        req.headers_mut().insert(header::HOST, host_header_val);
        Ok(())
    }
}

#[async_trait]
impl HttpClient for UpstreamHttpClient {
    async fn send_request(&self, mut req: Request<Body>) -> DispatchResult<Response<Body>> {
        Self::set_host_header(&mut req)?;

        let (mut parts, body) = req.into_parts();
        // Inbound requests may arrive as HTTP/2; the connector only speaks
        // HTTP/1.1, so pin the outbound version.
        parts.version = Version::HTTP_11;

        let method = parts.method.clone();
        let uri = parts.uri.clone();
        let outgoing_request = Request::from_parts(parts, body);

        let span = tracing::debug_span!(
            "backend_request",
            http.method = %method,
            http.url = %uri,
            http.status_code = tracing::field::Empty,
        );
        let _enter = span.enter();

        match timeout(self.call_timeout, self.client.request(outgoing_request)).await {
            Ok(Ok(response)) => {
                tracing::Span::current().record("http.status_code", response.status().as_u16());

                let (mut parts, hyper_body) = response.into_parts();
                // The body is re-framed while streaming back through axum.
                parts.headers.remove(header::TRANSFER_ENCODING);

                Ok(Response::from_parts(parts, Body::new(hyper_body)))
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "backend connection failed");
                Err(DispatchError::Connect(format!(
                    "request to {method} {uri} failed: {e}"
                )))
            }
            Err(_) => {
                tracing::debug!(timeout = ?self.call_timeout, "backend call timed out");
                Err(DispatchError::Timeout(self.call_timeout))
            }
        }
    }
}
