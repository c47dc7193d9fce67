//! The request-plane pipeline of the honeycomb proxy.
//!
//! Every accepted HTTPS request runs through the [`ProxyHandler`]: the server
//! name is taken from the request, the locator picks a backend, and the
//! request is forwarded over HTTP or upgraded to a WebSocket byte stream. A
//! [`Transaction`] follows the request from arrival to the last byte and
//! emits one structured access-log line when it closes.

mod body;
mod error;
mod handler;
mod headers;
mod http_forwarder;
mod statuspage;
mod transaction;
mod upstream;
mod websocket;
mod writer;

pub use body::{empty_body, full_body, BoxError, MeteredBody, ProxyBody};
pub use error::ProxyError;
pub use handler::ProxyHandler;
pub use headers::{
    is_websocket_upgrade, prepare_response_headers, prepare_upstream_headers, strip_hop_by_hop,
};
pub use http_forwarder::HttpForwarder;
pub use statuspage::StatusPage;
pub use transaction::{Transaction, TransactionState};
pub use upstream::{UpstreamConnector, UpstreamStream, DEFAULT_DIAL_TIMEOUT};
pub use websocket::WebSocketForwarder;
pub use writer::ResponseWriter;
