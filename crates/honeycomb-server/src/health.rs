//! The health-check endpoint and the frontend handler that intercepts it.

use std::net::SocketAddr;
use std::sync::Arc;

use http::{HeaderValue, Request, Response, StatusCode};
use hyper::body::Incoming;
use honeycomb_docker::{HealthChecker, HealthStatus};
use honeycomb_name::ServerName;
use honeycomb_proxy::{full_body, ProxyBody, ProxyHandler};
use tracing::warn;

/// Host the health check answers on. The name is never routed to a backend.
pub const HEALTH_CHECK_HOST: &str = "localhost";

/// Path the health check answers on.
pub const HEALTH_CHECK_PATH: &str = "/.honeycomb/health-check";

/// The HTTPS listener's handler: answers the health check itself and hands
/// everything else to the proxy.
pub struct FrontendHandler {
    proxy: Arc<ProxyHandler>,
    checker: Option<Arc<dyn HealthChecker>>,
}

impl FrontendHandler {
    pub fn new(proxy: Arc<ProxyHandler>, checker: Option<Arc<dyn HealthChecker>>) -> Self {
        FrontendHandler { proxy, checker }
    }

    pub async fn handle(
        &self,
        request: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Response<ProxyBody> {
        if is_health_check(&request) {
            return self.health_response().await;
        }

        self.proxy.handle(request, remote_addr).await
    }

    async fn health_response(&self) -> Response<ProxyBody> {
        let status = match &self.checker {
            Some(checker) => checker.check().await,
            None => HealthStatus {
                healthy: true,
                message: "the server is accepting requests, but no health-checker is configured"
                    .to_string(),
            },
        };

        if !status.healthy {
            warn!("{status}");
        }

        let mut response = Response::new(full_body(status.message));
        *response.status_mut() = if status.healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );

        response
    }
}

fn is_health_check(request: &Request<Incoming>) -> bool {
    if request.uri().path() != HEALTH_CHECK_PATH {
        return false;
    }

    let host = request
        .uri()
        .host()
        .map(str::to_string)
        .or_else(|| {
            request
                .headers()
                .get(http::header::HOST)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_default();

    ServerName::from_host_header(&host)
        .map(|name| name.unicode == HEALTH_CHECK_HOST)
        .unwrap_or(false)
}
