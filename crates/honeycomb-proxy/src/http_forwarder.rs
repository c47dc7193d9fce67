use std::collections::HashMap;
use std::time::{Duration, Instant};

use http::{Request, Response, Uri, Version};
use hyper::client::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};
use honeycomb_backend::{Endpoint, TlsMode};
use tokio::sync::Mutex;
use tracing::debug;

use crate::headers::prepare_response_headers;
use crate::{ProxyBody, ProxyError, ResponseWriter, UpstreamConnector};

/// Idle connections kept per backend.
const MAX_IDLE_PER_BACKEND: usize = 10;

/// How long an idle connection stays usable.
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

type PoolKey = (String, u8);

struct IdleConnection {
    sender: http1::SendRequest<ProxyBody>,
    idle_since: Instant,
}

/// Forwards plain HTTP requests to a backend.
///
/// HTTP/1.1 upstream connections are pooled per backend address. An inbound
/// HTTP/2 request to a non-TLS backend is forwarded over an unpooled h2c
/// connection so end-to-end HTTP/2 keeps working.
pub struct HttpForwarder {
    connector: UpstreamConnector,
    pool: Mutex<HashMap<PoolKey, Vec<IdleConnection>>>,
}

fn pool_key(endpoint: &Endpoint) -> PoolKey {
    let mode = match endpoint.tls_mode {
        TlsMode::Disabled => 0,
        TlsMode::Enabled => 1,
        TlsMode::Insecure => 2,
    };
    (endpoint.address.clone(), mode)
}

impl HttpForwarder {
    pub fn new(connector: UpstreamConnector) -> Self {
        HttpForwarder {
            connector,
            pool: Mutex::new(HashMap::new()),
        }
    }

    /// Forward a request and stream the backend's response to the client.
    pub async fn forward(
        &self,
        writer: &mut ResponseWriter,
        endpoint: &Endpoint,
        request: Request<ProxyBody>,
        inbound_version: Version,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        let response = if inbound_version == Version::HTTP_2 && endpoint.tls_mode == TlsMode::Disabled
        {
            self.roundtrip_h2c(endpoint, request).await?
        } else {
            self.roundtrip_http1(endpoint, request).await?
        };

        let (mut parts, body) = response.into_parts();
        prepare_response_headers(&mut parts.headers);

        let metered = writer.metered(body);
        Ok(writer.send(Response::from_parts(parts, metered)))
    }

    async fn roundtrip_http1(
        &self,
        endpoint: &Endpoint,
        request: Request<ProxyBody>,
    ) -> Result<Response<hyper::body::Incoming>, ProxyError> {
        let key = pool_key(endpoint);

        let mut sender = match self.checkout(&key).await {
            Some(sender) => sender,
            None => self.handshake(endpoint).await?,
        };

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| ProxyError::UpstreamIo(e.to_string()))?;

        self.checkin(key, sender).await;

        Ok(response)
    }

    async fn roundtrip_h2c(
        &self,
        endpoint: &Endpoint,
        request: Request<ProxyBody>,
    ) -> Result<Response<hyper::body::Incoming>, ProxyError> {
        let (mut parts, body) = request.into_parts();
        parts.uri = absolute_uri(&parts.uri, "http", &endpoint.address)?;
        let request = Request::from_parts(parts, body);

        let stream = self.connector.connect(endpoint).await?;
        let (mut sender, connection) = http2::handshake(TokioExecutor::new(), TokioIo::new(stream))
            .await
            .map_err(|e| ProxyError::UpstreamDial(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(error) = connection.await {
                debug!(%error, "h2c upstream connection closed");
            }
        });

        sender
            .send_request(request)
            .await
            .map_err(|e| ProxyError::UpstreamIo(e.to_string()))
    }

    async fn handshake(
        &self,
        endpoint: &Endpoint,
    ) -> Result<http1::SendRequest<ProxyBody>, ProxyError> {
        let stream = self.connector.connect(endpoint).await?;

        let (sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| ProxyError::UpstreamDial(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(error) = connection.await {
                debug!(%error, "upstream connection closed");
            }
        });

        Ok(sender)
    }

    async fn checkout(&self, key: &PoolKey) -> Option<http1::SendRequest<ProxyBody>> {
        let mut pool = self.pool.lock().await;
        let idle = pool.get_mut(key)?;

        while let Some(connection) = idle.pop() {
            if connection.sender.is_ready() && connection.idle_since.elapsed() < IDLE_TIMEOUT {
                debug!(backend = %key.0, "reusing pooled connection");
                return Some(connection.sender);
            }
            // Stale or busy; dropping it lets the connection task wind down.
        }

        None
    }

    async fn checkin(&self, key: PoolKey, sender: http1::SendRequest<ProxyBody>) {
        if sender.is_closed() {
            return;
        }

        let mut pool = self.pool.lock().await;
        let idle = pool.entry(key).or_default();

        if idle.len() < MAX_IDLE_PER_BACKEND {
            idle.push(IdleConnection {
                sender,
                idle_since: Instant::now(),
            });
        }
    }
}

/// Rewrite an origin-form URI into absolute form for HTTP/2 upstreams.
fn absolute_uri(uri: &Uri, scheme: &str, authority: &str) -> Result<Uri, ProxyError> {
    Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(
            uri.path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/"),
        )
        .build()
        .map_err(|e| ProxyError::UpstreamIo(e.to_string()))
}
