use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use http::{Method, StatusCode, Uri, Version};
use honeycomb_backend::Endpoint;
use honeycomb_name::ServerName;
use tracing::info;

use crate::ProxyError;

/// A request's progress through its life-cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// The request has been received.
    Received,
    /// The response headers have been sent.
    Responded,
    /// The request is complete.
    Closed,
}

#[derive(Debug)]
struct Inner {
    state: TransactionState,
    server_name: Option<ServerName>,
    endpoint: Option<Endpoint>,
    status: Option<StatusCode>,
    error: Option<String>,
    is_logged: bool,
    started_at: Instant,
    time_to_first_byte: Option<f64>,
    time_to_last_byte: Option<f64>,
    bytes_in: u64,
    bytes_out: u64,
}

/// The state of one HTTP request across its lifetime.
///
/// State transitions are monotonic (`Received` → `Responded` → `Closed`) and
/// `close` is idempotent. Closing emits the access-log line.
#[derive(Debug)]
pub struct Transaction {
    remote_addr: SocketAddr,
    host: String,
    method: Method,
    uri: Uri,
    protocol: &'static str,
    is_websocket: bool,
    inner: Mutex<Inner>,
}

fn protocol_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/?",
    }
}

impl Transaction {
    pub fn new(
        remote_addr: SocketAddr,
        host: &str,
        method: Method,
        uri: Uri,
        version: Version,
        is_websocket: bool,
    ) -> Arc<Self> {
        Arc::new(Transaction {
            remote_addr,
            host: host.to_string(),
            method,
            uri,
            protocol: protocol_name(version),
            is_websocket,
            inner: Mutex::new(Inner {
                state: TransactionState::Received,
                server_name: None,
                endpoint: None,
                status: None,
                error: None,
                is_logged: true,
                started_at: Instant::now(),
                time_to_first_byte: None,
                time_to_last_byte: None,
                bytes_in: 0,
                bytes_out: 0,
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_websocket(&self) -> bool {
        self.is_websocket
    }

    pub fn state(&self) -> TransactionState {
        self.lock().state
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.lock().status
    }

    pub fn bytes_in(&self) -> u64 {
        self.lock().bytes_in
    }

    pub fn bytes_out(&self) -> u64 {
        self.lock().bytes_out
    }

    pub fn set_server_name(&self, server_name: ServerName) {
        self.lock().server_name = Some(server_name);
    }

    pub fn server_name(&self) -> Option<ServerName> {
        self.lock().server_name.clone()
    }

    pub fn set_endpoint(&self, endpoint: Endpoint) {
        self.lock().endpoint = Some(endpoint);
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.lock().endpoint.clone()
    }

    pub fn set_error(&self, error: &ProxyError) {
        self.lock().error = Some(error.to_string());
    }

    pub fn set_stream_error(&self, message: String) {
        let mut inner = self.lock();
        if inner.error.is_none() {
            inner.error = Some(message);
        }
    }

    pub fn add_bytes_in(&self, count: u64) {
        self.lock().bytes_in += count;
    }

    pub fn add_bytes_out(&self, count: u64) {
        self.lock().bytes_out += count;
    }

    /// Record that the response headers have been sent.
    pub fn respond(&self, status: StatusCode) {
        let mut inner = self.lock();
        if inner.state != TransactionState::Received {
            return;
        }

        inner.state = TransactionState::Responded;
        inner.status = Some(status);
        inner.time_to_first_byte = Some(elapsed_ms(inner.started_at));
    }

    /// Record that the client connection has been commandeered for a
    /// protocol upgrade, and log the transaction immediately.
    pub fn hijacked(&self) {
        self.respond(StatusCode::SWITCHING_PROTOCOLS);
        let line = self.line(&self.lock());
        info!(target: "honeycomb::access", "{line}");
    }

    /// Mark the request complete. Idempotent; emits the access-log line.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.state == TransactionState::Closed {
            return;
        }

        inner.state = TransactionState::Closed;
        inner.time_to_last_byte = Some(elapsed_ms(inner.started_at));

        if inner.is_logged && !self.is_muted(&inner) {
            let line = self.line(&inner);
            drop(inner);
            info!(target: "honeycomb::access", "{line}");
        }
    }

    /// Favicon probes that did not end in a server error are noise.
    fn is_muted(&self, inner: &Inner) -> bool {
        if self.uri.path() != "/favicon.ico" {
            return false;
        }

        match inner.status {
            Some(status) => (200..500).contains(&status.as_u16()),
            None => false,
        }
    }

    /// Render the access-log line.
    ///
    /// Space-separated fields: remote address, frontend URL, backend URL,
    /// backend description, `"METHOD URI PROTO"`, status code, bytes in,
    /// bytes out, time to first byte, time to last byte, and an optional
    /// trailing message. Unknown fields render as `-`; fields containing
    /// whitespace or quotes are double-quoted.
    fn line(&self, inner: &Inner) -> String {
        let mut buffer = String::new();

        write_field(&mut buffer, &self.remote_addr.to_string());

        let frontend_scheme = if self.is_websocket { "wss" } else { "https" };
        write_field(&mut buffer, &format!("{frontend_scheme}://{}", self.host));

        match &inner.endpoint {
            None => {
                write_field(&mut buffer, "");
                write_field(&mut buffer, "");
            }
            Some(endpoint) => {
                write_field(
                    &mut buffer,
                    &format!(
                        "{}://{}",
                        endpoint.scheme(self.is_websocket),
                        endpoint.address
                    ),
                );
                write_field(&mut buffer, &endpoint.description);
            }
        }

        write_field(
            &mut buffer,
            &format!("{} {} {}", self.method, self.uri, self.protocol),
        );

        match inner.status {
            None => write_field(&mut buffer, ""),
            Some(status) => write_field(&mut buffer, status.as_str()),
        }

        write_field(&mut buffer, &format!("i/{}", inner.bytes_in));
        write_field(&mut buffer, &format!("o/{}", inner.bytes_out));

        match inner.time_to_first_byte {
            None => write_field(&mut buffer, ""),
            Some(ms) => write_field(&mut buffer, &format!("f/{ms:.2}ms")),
        }

        match inner.time_to_last_byte {
            None => write_field(&mut buffer, ""),
            Some(ms) => write_field(&mut buffer, &format!("l/{ms:.2}ms")),
        }

        if let Some(error) = &inner.error {
            write_field(&mut buffer, error);
        } else if self.is_websocket && inner.state == TransactionState::Responded {
            write_field(&mut buffer, "websocket connection established");
        }

        buffer
    }
}

fn elapsed_ms(started_at: Instant) -> f64 {
    started_at.elapsed().as_secs_f64() * 1000.0
}

/// Append a field, quoting it when it contains whitespace or quotes so the
/// line stays machine-parseable.
fn write_field(buffer: &mut String, value: &str) {
    if !buffer.is_empty() {
        buffer.push(' ');
    }

    if value.is_empty() {
        buffer.push('-');
        return;
    }

    if value.contains(|c: char| c.is_whitespace() || c == '"') {
        let _ = write!(buffer, "{value:?}");
    } else {
        buffer.push_str(value);
    }
}

#[cfg(test)]
mod tests {
    use honeycomb_backend::TlsMode;

    use super::*;

    fn transaction(is_websocket: bool) -> Arc<Transaction> {
        Transaction::new(
            "10.1.2.3:55555".parse().unwrap(),
            "www.example.com",
            Method::GET,
            Uri::from_static("/index.html?q=1"),
            Version::HTTP_11,
            is_websocket,
        )
    }

    fn endpoint() -> Endpoint {
        Endpoint {
            description: "example backend".to_string(),
            address: "backend:8080".to_string(),
            tls_mode: TlsMode::Disabled,
        }
    }

    #[test]
    fn transitions_are_monotonic() {
        let txn = transaction(false);
        assert_eq!(txn.state(), TransactionState::Received);

        txn.respond(StatusCode::OK);
        assert_eq!(txn.state(), TransactionState::Responded);
        assert_eq!(txn.status(), Some(StatusCode::OK));

        // A second respond must not rewind or overwrite.
        txn.respond(StatusCode::NOT_FOUND);
        assert_eq!(txn.status(), Some(StatusCode::OK));

        txn.close();
        assert_eq!(txn.state(), TransactionState::Closed);

        // Close is idempotent.
        txn.close();
        assert_eq!(txn.state(), TransactionState::Closed);
    }

    #[test]
    fn the_log_line_renders_every_field() {
        let txn = transaction(false);
        txn.set_endpoint(endpoint());
        txn.respond(StatusCode::OK);
        txn.add_bytes_in(10);
        txn.add_bytes_out(2048);

        let line = txn.line(&txn.lock());

        assert!(line.starts_with("10.1.2.3:55555 https://www.example.com "));
        assert!(line.contains("http://backend:8080"));
        assert!(line.contains("\"example backend\""));
        assert!(line.contains("\"GET /index.html?q=1 HTTP/1.1\""));
        assert!(line.contains(" 200 "));
        assert!(line.contains(" i/10 "));
        assert!(line.contains(" o/2048 "));
        assert!(line.contains(" f/"));
    }

    #[test]
    fn unrouted_requests_render_placeholders() {
        let txn = transaction(false);
        let line = txn.line(&txn.lock());

        assert!(line.contains(" - - "), "missing backend placeholders: {line}");
        // No status, no timings yet.
        assert!(line.ends_with("- i/0 o/0 - -"), "unexpected tail: {line}");
    }

    #[test]
    fn websocket_transactions_use_wss_frontend_and_upgrade_message() {
        let txn = transaction(true);
        txn.set_endpoint(endpoint());
        txn.hijacked();

        let line = txn.line(&txn.lock());
        assert!(line.contains("wss://www.example.com"));
        assert!(line.contains("ws://backend:8080"));
        assert!(line.contains(" 101 "));
        assert!(line.ends_with("\"websocket connection established\""));
    }

    #[test]
    fn errors_are_appended_to_the_line() {
        let txn = transaction(false);
        txn.set_error(&ProxyError::NotRouted {
            name: "www.example.com".to_string(),
        });
        txn.respond(StatusCode::NOT_FOUND);
        txn.close();

        let line = txn.line(&txn.lock());
        assert!(line.ends_with("\"could not locate backend for 'www.example.com'\""));
    }

    #[test]
    fn favicon_probes_are_muted() {
        let txn = Transaction::new(
            "10.1.2.3:55555".parse().unwrap(),
            "www.example.com",
            Method::GET,
            Uri::from_static("/favicon.ico"),
            Version::HTTP_11,
            false,
        );

        txn.respond(StatusCode::NOT_FOUND);
        assert!(txn.is_muted(&txn.lock()));

        let txn = Transaction::new(
            "10.1.2.3:55555".parse().unwrap(),
            "www.example.com",
            Method::GET,
            Uri::from_static("/favicon.ico"),
            Version::HTTP_11,
            false,
        );
        txn.respond(StatusCode::BAD_GATEWAY);
        assert!(!txn.is_muted(&txn.lock()));
    }

    #[test]
    fn quoting_only_applies_to_fields_with_whitespace() {
        let mut buffer = String::new();
        write_field(&mut buffer, "plain");
        write_field(&mut buffer, "two words");
        write_field(&mut buffer, "");
        assert_eq!(buffer, "plain \"two words\" -");
    }
}
