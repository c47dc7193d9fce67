use http::header::{HeaderMap, HeaderName, HeaderValue};

/// Hop-by-hop headers are meaningful for a single connection and must not be
/// forwarded through the proxy, in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "upgrade-insecure-requests",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Remove hop-by-hop headers in place.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let doomed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop(name))
        .cloned()
        .collect();

    for name in doomed {
        headers.remove(name);
    }
}

/// Check whether a comma-separated header contains a token,
/// case-insensitively.
fn header_list_contains(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers.get_all(name).iter().any(|value| {
        value
            .to_str()
            .map(|value| {
                value
                    .split(',')
                    .any(|item| item.trim().eq_ignore_ascii_case(token))
            })
            .unwrap_or(false)
    })
}

/// Check whether the headers describe a WebSocket upgrade: `Connection`
/// lists `upgrade` and `Upgrade` lists `websocket`.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    header_list_contains(headers, http::header::CONNECTION, "upgrade")
        && header_list_contains(headers, http::header::UPGRADE, "websocket")
}

/// Produce the headers sent to the backend.
///
/// Hop-by-hop headers are stripped, the client address is appended to
/// `X-Forwarded-For`, and the backend learns the original host plus the fact
/// that the client-facing connection was TLS.
pub fn prepare_upstream_headers(
    headers: &HeaderMap,
    host: &str,
    remote_ip: &str,
    websocket: bool,
) -> HeaderMap {
    let mut upstream = HeaderMap::with_capacity(headers.len() + 4);
    let mut forwarded_for: Vec<String> = Vec::new();

    for (name, value) in headers {
        if name == &http::header::HOST {
            continue;
        } else if name.as_str() == "x-forwarded-for" {
            if let Ok(value) = value.to_str() {
                forwarded_for.push(value.to_string());
            }
        } else if !is_hop_by_hop(name) {
            upstream.append(name.clone(), value.clone());
        }
    }

    forwarded_for.push(remote_ip.to_string());

    if let Ok(host) = HeaderValue::from_str(host) {
        upstream.insert(http::header::HOST, host);
    }
    if let Ok(value) = HeaderValue::from_str(&forwarded_for.join(", ")) {
        upstream.insert(HeaderName::from_static("x-forwarded-for"), value);
    }
    upstream.insert(
        HeaderName::from_static("x-forwarded-proto"),
        HeaderValue::from_static(if websocket { "wss" } else { "https" }),
    );
    upstream.insert(
        HeaderName::from_static("x-forwarded-ssl"),
        HeaderValue::from_static("on"),
    );

    upstream
}

/// Prepare response headers for the client: strip hop-by-hop headers and pin
/// HTTPS with HSTS.
pub fn prepare_response_headers(headers: &mut HeaderMap) {
    strip_hop_by_hop(headers);
    headers.insert(
        http::header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=15768000"),
    );
}
