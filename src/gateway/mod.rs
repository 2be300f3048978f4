//! Single public ingress in front of the users and data services.
//!
//! The gateway keeps no state between requests: each request is matched
//! against the route table, forwarded once, and the backend response is
//! streamed back with the gateway's CORS headers applied.

pub mod cors;
pub mod routes;

use crate::config::Config;
use crate::error::{AppError, Result};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub use cors::CorsPolicy;
pub use routes::{Route, RouteTable, Service};

/// Connection-scoped headers that must not be forwarded by a proxy.
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub struct Gateway {
    client: Client,
    routes: RouteTable,
    cors: CorsPolicy,
    max_body_bytes: usize,
}

impl Gateway {
    pub fn new(config: &Config) -> Result<Self> {
        Self::from_parts(
            RouteTable::from_config(&config.gateway, &config.services),
            CorsPolicy::new(&config.gateway.allowed_origin)?,
            Duration::from_secs(config.gateway.request_timeout_seconds),
            usize::try_from(config.gateway.max_body_bytes).unwrap_or(usize::MAX),
        )
    }

    pub fn from_parts(
        routes: RouteTable,
        cors: CorsPolicy,
        timeout: Duration,
        max_body_bytes: usize,
    ) -> Result<Self> {
        // Redirects are returned to the caller as-is, never followed here
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            routes,
            cors,
            max_body_bytes,
        })
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Forward one request; every outcome carries the CORS headers.
    pub async fn handle(&self, request: Request) -> Response {
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        let mut response = match self.forward(request).await {
            Ok(response) => {
                debug!("{} {} -> {}", method, path, response.status());
                response
            }
            Err(e) => {
                match &e {
                    AppError::RouteNotFound(_) => debug!("{} {}: {}", method, path, e),
                    _ => warn!("{} {} failed: {}", method, path, e),
                }
                e.into_response()
            }
        };

        self.cors.apply(response.headers_mut());
        response
    }

    async fn forward(&self, request: Request) -> Result<Response> {
        let path = request.uri().path();
        let route = self
            .routes
            .find(path)
            .ok_or_else(|| AppError::RouteNotFound(path.to_string()))?;

        if cors::is_preflight(request.method(), request.headers()) {
            return Ok(StatusCode::NO_CONTENT.into_response());
        }

        let url = self.routes.upstream_url(route, path, request.uri().query());
        let service = route.service;

        let declared_length = request
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared_length.map(|len| len > self.max_body_bytes).unwrap_or(false) {
            return Err(AppError::PayloadTooLarge(self.max_body_bytes));
        }

        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|_| AppError::PayloadTooLarge(self.max_body_bytes))?;

        let mut headers = strip_hop_by_hop(&parts.headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        debug!("Forwarding {} {} to {} at {}", parts.method, parts.uri, service, url);

        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnreachable(format!("{} ({}): {}", service, url, e)))?;

        let status = upstream.status();
        let headers = strip_hop_by_hop(upstream.headers());
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        Ok(response)
    }
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = headers.clone();
    for name in HOP_BY_HOP.iter() {
        filtered.remove(name);
    }
    filtered.remove("keep-alive");
    filtered
}

async fn handle_request(State(gateway): State<Arc<Gateway>>, request: Request) -> Response {
    gateway.handle(request).await
}

/// Every path goes through the gateway's own prefix table.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new().fallback(handle_request).with_state(gateway)
}

pub async fn serve<F>(listener: TcpListener, gateway: Arc<Gateway>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    for route in gateway.routes().routes() {
        info!("Route {} -> {}", route.prefix, route.service);
    }
    info!("API gateway listening on {}", addr);

    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
