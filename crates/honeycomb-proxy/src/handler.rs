use std::net::SocketAddr;
use std::sync::Arc;

use http::uri::PathAndQuery;
use http::{Request, Response, Uri, Version};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::upgrade::OnUpgrade;
use honeycomb_backend::Locator;
use honeycomb_name::ServerName;

use crate::headers::{is_websocket_upgrade, prepare_upstream_headers};
use crate::{
    empty_body, HttpForwarder, MeteredBody, ProxyBody, ProxyError, ResponseWriter, Transaction,
    TransactionState, UpstreamConnector, WebSocketForwarder,
};

/// The request-plane entry point.
///
/// Owns the locator and the two forwarders; every accepted request runs
/// through [`handle`](ProxyHandler::handle), which never fails: errors are
/// rendered as status pages and recorded in the transaction.
pub struct ProxyHandler {
    locator: Arc<dyn Locator>,
    http: HttpForwarder,
    websocket: WebSocketForwarder,
}

impl ProxyHandler {
    pub fn new(locator: Arc<dyn Locator>, connector: UpstreamConnector) -> Self {
        ProxyHandler {
            locator,
            http: HttpForwarder::new(connector.clone()),
            websocket: WebSocketForwarder::new(connector),
        }
    }

    /// Proxy one request end to end.
    pub async fn handle(
        &self,
        mut request: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Response<ProxyBody> {
        let is_websocket = is_websocket_upgrade(request.headers());
        let upgrade = if is_websocket {
            request.extensions_mut().remove::<OnUpgrade>()
        } else {
            None
        };

        let host = request_host(&request);
        let accept = request
            .headers()
            .get(http::header::ACCEPT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let transaction = Transaction::new(
            remote_addr,
            &host,
            request.method().clone(),
            origin_form(request.uri()),
            request.version(),
            is_websocket,
        );
        let mut writer = ResponseWriter::new(transaction.clone(), upgrade);

        match self
            .dispatch(&mut writer, request, &host, remote_addr, is_websocket)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                transaction.set_error(&error);

                if transaction.state() == TransactionState::Received {
                    writer.send_status_page(error.status(), accept.as_deref())
                } else {
                    // The response already started; nothing useful can be
                    // sent, just account for the failure.
                    transaction.close();
                    Response::new(empty_body())
                }
            }
        }
    }

    async fn dispatch(
        &self,
        writer: &mut ResponseWriter,
        request: Request<Incoming>,
        host: &str,
        remote_addr: SocketAddr,
        is_websocket: bool,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        let transaction = writer.transaction().clone();

        let server_name = ServerName::from_host_header(host)?;
        transaction.set_server_name(server_name.clone());

        let location = self.locator.locate(&server_name).await;
        let Some(endpoint) = location.endpoint else {
            return Err(ProxyError::NotRouted {
                name: server_name.unicode,
            });
        };
        transaction.set_endpoint(endpoint.clone());

        let (parts, body) = request.into_parts();

        let headers = prepare_upstream_headers(
            &parts.headers,
            host,
            &remote_addr.ip().to_string(),
            is_websocket,
        );

        let body: ProxyBody = MeteredBody::inbound(body, transaction.clone()).boxed();

        let mut upstream = Request::new(body);
        *upstream.method_mut() = parts.method;
        *upstream.uri_mut() = origin_form(&parts.uri);
        *upstream.headers_mut() = headers;
        *upstream.version_mut() = Version::HTTP_11;

        if is_websocket {
            self.websocket.forward(writer, &endpoint, upstream).await
        } else {
            self.http
                .forward(writer, &endpoint, upstream, parts.version)
                .await
        }
    }
}

/// The host the client asked for: the URI authority (HTTP/2) or the `Host`
/// header (HTTP/1.1).
fn request_host(request: &Request<Incoming>) -> String {
    if let Some(authority) = request.uri().authority() {
        return authority.to_string();
    }

    request
        .headers()
        .get(http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Reduce a URI to origin form (path and query only).
fn origin_form(uri: &Uri) -> Uri {
    let path_and_query = uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));

    Uri::from(path_and_query)
}
