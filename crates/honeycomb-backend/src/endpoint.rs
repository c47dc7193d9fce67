use std::fmt;

/// The TLS posture of a backend server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// The backend speaks plain HTTP.
    #[default]
    Disabled,
    /// The backend speaks HTTPS and its certificate is verified.
    Enabled,
    /// The backend speaks HTTPS but its certificate is not verified.
    Insecure,
}

impl TlsMode {
    pub fn is_tls(self) -> bool {
        !matches!(self, TlsMode::Disabled)
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TlsMode::Disabled => "disabled",
            TlsMode::Enabled => "enabled",
            TlsMode::Insecure => "insecure",
        })
    }
}

/// A back-end HTTP(S) server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// A human readable description of the endpoint, not necessarily unique.
    pub description: String,
    /// The network address of the backend, including the port.
    pub address: String,
    /// Whether the backend expects a TLS connection.
    pub tls_mode: TlsMode,
}

impl Endpoint {
    /// The URL scheme used to reach this endpoint.
    pub fn scheme(&self, websocket: bool) -> &'static str {
        match (websocket, self.tls_mode.is_tls()) {
            (true, true) => "wss",
            (true, false) => "ws",
            (false, true) => "https",
            (false, false) => "http",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_follows_tls_mode_and_websocket_flag() {
        let mut endpoint = Endpoint {
            description: "test".to_string(),
            address: "backend:80".to_string(),
            tls_mode: TlsMode::Disabled,
        };

        assert_eq!(endpoint.scheme(false), "http");
        assert_eq!(endpoint.scheme(true), "ws");

        endpoint.tls_mode = TlsMode::Enabled;
        assert_eq!(endpoint.scheme(false), "https");
        assert_eq!(endpoint.scheme(true), "wss");

        endpoint.tls_mode = TlsMode::Insecure;
        assert_eq!(endpoint.scheme(false), "https");
    }

    #[test]
    fn equality_is_field_wise() {
        let a = Endpoint {
            description: "a".to_string(),
            address: "backend:80".to_string(),
            tls_mode: TlsMode::Disabled,
        };
        let mut b = a.clone();
        assert_eq!(a, b);

        b.tls_mode = TlsMode::Insecure;
        assert_ne!(a, b);
    }
}
