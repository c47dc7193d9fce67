//! The plaintext listener: everything it receives is redirected to HTTPS.

use std::convert::Infallible;
use std::net::SocketAddr;

use anyhow::Context as _;
use http::{HeaderValue, Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use honeycomb_proxy::{empty_body, ProxyBody};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::proxyproto::{self, ProxiedStream};

/// Listen on the plaintext port and redirect every request to HTTPS.
pub async fn serve(port: u16, proxy_protocol: bool) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind redirect listener on port {port}"))?;

    info!(port, "redirect listener started");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                warn!(%error, "redirect accept failed");
                continue;
            }
        };

        tokio::spawn(async move {
            let stream = if proxy_protocol {
                match proxyproto::accept(stream, peer).await {
                    Ok((stream, _)) => stream,
                    Err(error) => {
                        debug!(%error, "dropping connection with a bad PROXY header");
                        return;
                    }
                }
            } else {
                ProxiedStream::passthrough(stream)
            };

            let service = service_fn(|request: Request<Incoming>| async move {
                Ok::<_, Infallible>(redirect_response(&request))
            });

            if let Err(error) = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(%error, "redirect connection closed");
            }
        });
    }
}

/// Build the `307` pointing the client at the HTTPS listener.
fn redirect_response<B>(request: &Request<B>) -> Response<ProxyBody> {
    let host = request
        .headers()
        .get(http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let mut target = format!("https://{host}{}", request.uri().path());
    if let Some(query) = request.uri().query() {
        target.push('?');
        target.push_str(query);
    }

    let mut response = Response::new(empty_body());
    *response.status_mut() = StatusCode::TEMPORARY_REDIRECT;

    match HeaderValue::from_str(&target) {
        Ok(location) => {
            response.headers_mut().insert(http::header::LOCATION, location);
        }
        Err(_) => {
            *response.status_mut() = StatusCode::BAD_REQUEST;
        }
    }

    response
}
