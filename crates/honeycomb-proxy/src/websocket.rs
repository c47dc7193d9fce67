use http::header::{HeaderValue, CONNECTION, UPGRADE};
use http::{Request, Response, StatusCode};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use honeycomb_backend::Endpoint;
use tracing::debug;

use crate::headers::prepare_response_headers;
use crate::{empty_body, ProxyBody, ProxyError, ResponseWriter, UpstreamConnector};

/// Relays WebSocket upgrades to a backend.
///
/// The upgrade request travels over a dedicated HTTP/1.1 connection. When
/// the backend answers `101 Switching Protocols` the client connection is
/// hijacked and the two byte streams are coupled until either side closes;
/// any bytes the backend sent ahead of the coupling are preserved by the
/// upgrade machinery. A backend that declines the upgrade is proxied as a
/// normal response.
pub struct WebSocketForwarder {
    connector: UpstreamConnector,
}

impl WebSocketForwarder {
    pub fn new(connector: UpstreamConnector) -> Self {
        WebSocketForwarder { connector }
    }

    pub async fn forward(
        &self,
        writer: &mut ResponseWriter,
        endpoint: &Endpoint,
        mut request: Request<ProxyBody>,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        let stream = self.connector.connect(endpoint).await?;

        let (mut sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| ProxyError::UpstreamDial(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(error) = connection.with_upgrades().await {
                debug!(%error, "websocket upstream connection closed");
            }
        });

        // Re-add the hop-by-hop headers the upgrade needs.
        request
            .headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("upgrade"));
        request
            .headers_mut()
            .insert(UPGRADE, HeaderValue::from_static("websocket"));

        let mut upstream_response = sender
            .send_request(request)
            .await
            .map_err(|e| ProxyError::UpstreamProtocol(e.to_string()))?;

        // A backend that does not switch protocols is proxied unchanged.
        if upstream_response.status() != StatusCode::SWITCHING_PROTOCOLS {
            let (mut parts, body) = upstream_response.into_parts();
            prepare_response_headers(&mut parts.headers);
            let metered = writer.metered(body);
            return Ok(writer.send(Response::from_parts(parts, metered)));
        }

        // Hijack the client before answering; this also logs the upgrade.
        let client_upgrade = writer.hijack()?;
        let upstream_upgrade = hyper::upgrade::on(&mut upstream_response);
        let transaction = writer.transaction().clone();

        tokio::spawn(async move {
            let client = match client_upgrade.await {
                Ok(io) => io,
                Err(error) => {
                    transaction.set_stream_error(error.to_string());
                    transaction.close();
                    return;
                }
            };
            let upstream = match upstream_upgrade.await {
                Ok(io) => io,
                Err(error) => {
                    transaction.set_stream_error(error.to_string());
                    transaction.close();
                    return;
                }
            };

            let mut client = TokioIo::new(client);
            let mut upstream = TokioIo::new(upstream);

            match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
                Ok((client_to_upstream, upstream_to_client)) => {
                    transaction.add_bytes_in(client_to_upstream);
                    transaction.add_bytes_out(upstream_to_client);
                }
                Err(error) => {
                    transaction.set_stream_error(error.to_string());
                }
            }

            transaction.close();
        });

        // Answer the client with the backend's 101, restoring the upgrade
        // headers stripped as hop-by-hop.
        let mut response = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .body(empty_body())
            .map_err(|e| ProxyError::UpstreamProtocol(e.to_string()))?;

        let mut headers = upstream_response.headers().clone();
        prepare_response_headers(&mut headers);
        *response.headers_mut() = headers;
        response
            .headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("upgrade"));
        response
            .headers_mut()
            .insert(UPGRADE, HeaderValue::from_static("websocket"));

        Ok(response)
    }
}
