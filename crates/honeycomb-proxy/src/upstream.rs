use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use honeycomb_backend::{Endpoint, TlsMode};
use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::pki_types::{CertificateDer, ServerName as TlsServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::ProxyError;

/// Default time budget for dialing a backend.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Dials backends, wrapping the stream in TLS according to the endpoint's
/// TLS mode. The `insecure` mode skips certificate verification entirely;
/// the `enabled` mode verifies against the configured trust roots.
#[derive(Clone)]
pub struct UpstreamConnector {
    dial_timeout: Duration,
    secure: TlsConnector,
    insecure: TlsConnector,
}

impl UpstreamConnector {
    pub fn new(roots: RootCertStore) -> Self {
        let secure = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let insecure = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate::new()))
            .with_no_client_auth();

        UpstreamConnector {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            secure: TlsConnector::from(Arc::new(secure)),
            insecure: TlsConnector::from(Arc::new(insecure)),
        }
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        if timeout > Duration::ZERO {
            self.dial_timeout = timeout;
        }
        self
    }

    /// Open a connection to the endpoint, TLS-wrapped when required.
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<UpstreamStream, ProxyError> {
        let tcp = tokio::time::timeout(self.dial_timeout, TcpStream::connect(&endpoint.address))
            .await
            .map_err(|_| {
                ProxyError::UpstreamDial(format!("timed out connecting to {}", endpoint.address))
            })?
            .map_err(|e| ProxyError::UpstreamDial(e.to_string()))?;

        let connector = match endpoint.tls_mode {
            TlsMode::Disabled => return Ok(UpstreamStream::Plain(tcp)),
            TlsMode::Enabled => &self.secure,
            TlsMode::Insecure => &self.insecure,
        };

        let host = endpoint
            .address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&endpoint.address);
        let server_name = TlsServerName::try_from(host.to_string())
            .map_err(|e| ProxyError::UpstreamDial(e.to_string()))?;

        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| ProxyError::UpstreamDial(e.to_string()))?;

        Ok(UpstreamStream::Tls(Box::new(tls)))
    }
}

/// A backend connection, plain or TLS.
pub enum UpstreamStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for UpstreamStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            UpstreamStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for UpstreamStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            UpstreamStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            UpstreamStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            UpstreamStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            UpstreamStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// A verifier that accepts any backend certificate, for endpoints in the
/// `insecure` TLS mode.
#[derive(Debug)]
struct AcceptAnyCertificate {
    schemes: Vec<SignatureScheme>,
}

impl AcceptAnyCertificate {
    fn new() -> Self {
        AcceptAnyCertificate {
            schemes: rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes(),
        }
    }
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &TlsServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(address: &str, tls_mode: TlsMode) -> Endpoint {
        Endpoint {
            description: "test".to_string(),
            address: address.to_string(),
            tls_mode,
        }
    }

    #[tokio::test]
    async fn dial_failures_surface_as_upstream_dial_errors() {
        // An unroutable address per RFC 5737.
        let connector =
            UpstreamConnector::new(RootCertStore::empty()).with_dial_timeout(Duration::from_millis(50));

        let result = connector
            .connect(&endpoint("192.0.2.1:9", TlsMode::Disabled))
            .await;
        assert!(matches!(result, Err(ProxyError::UpstreamDial(_))));
    }

    #[tokio::test]
    async fn plain_endpoints_yield_plain_streams() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connector = UpstreamConnector::new(RootCertStore::empty());
        let stream = connector
            .connect(&endpoint(&addr.to_string(), TlsMode::Disabled))
            .await
            .unwrap();

        assert!(matches!(stream, UpstreamStream::Plain(_)));
    }
}
