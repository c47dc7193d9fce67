//! The HTTPS listener: TLS termination with SNI-driven certificate
//! selection.
//!
//! Certificates may require loader probes or adhoc issuance, so the
//! handshake is split with [`LazyConfigAcceptor`]: the ClientHello is read
//! first, the certificate resolver runs asynchronously, and the handshake
//! completes against a per-connection server config built around the chosen
//! certificate.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use http::Request;
use honeycomb_cert::CertificateResolver;
use rustls::crypto::CryptoProvider;
use rustls::server::ResolvesServerCert;
use rustls::sign::CertifiedKey;
use rustls::{ServerConfig, SupportedProtocolVersion};
use tokio::net::TcpListener;
use tokio_rustls::LazyConfigAcceptor;
use tracing::{debug, info, warn};

use crate::health::FrontendHandler;
use crate::proxyproto::{self, ProxiedStream};

/// TLS posture of the listener: accepted protocol versions and cipher
/// suites.
pub struct TlsSettings {
    pub versions: Vec<&'static SupportedProtocolVersion>,
    pub provider: Arc<CryptoProvider>,
}

/// Serves a fixed certificate chosen before the handshake completed.
#[derive(Debug)]
struct SingleCertResolver(Arc<CertifiedKey>);

impl ResolvesServerCert for SingleCertResolver {
    fn resolve(
        &self,
        _client_hello: rustls::server::ClientHello<'_>,
    ) -> Option<Arc<CertifiedKey>> {
        Some(self.0.clone())
    }
}

/// Build the per-connection server config around the resolved certificate.
fn server_config(
    certificate: Arc<CertifiedKey>,
    settings: &TlsSettings,
) -> anyhow::Result<Arc<ServerConfig>> {
    let mut config = ServerConfig::builder_with_provider(settings.provider.clone())
        .with_protocol_versions(&settings.versions)
        .context("unusable TLS protocol versions")?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SingleCertResolver(certificate)));

    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Accept HTTPS connections until the process exits.
pub async fn serve(
    port: u16,
    proxy_protocol: bool,
    resolver: Arc<CertificateResolver>,
    settings: Arc<TlsSettings>,
    handler: Arc<FrontendHandler>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind HTTPS listener on port {port}"))?;

    info!(port, "listening for HTTPS connections");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                warn!(%error, "accept failed");
                continue;
            }
        };

        let resolver = resolver.clone();
        let settings = settings.clone();
        let handler = handler.clone();

        tokio::spawn(async move {
            if let Err(error) =
                handle_connection(stream, peer, proxy_protocol, resolver, settings, handler).await
            {
                debug!(%error, %peer, "connection closed with error");
            }
        });
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    socket_peer: SocketAddr,
    proxy_protocol: bool,
    resolver: Arc<CertificateResolver>,
    settings: Arc<TlsSettings>,
    handler: Arc<FrontendHandler>,
) -> anyhow::Result<()> {
    let (stream, peer) = if proxy_protocol {
        proxyproto::accept(stream, socket_peer).await?
    } else {
        (ProxiedStream::passthrough(stream), socket_peer)
    };

    let acceptor = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), stream);
    let start = acceptor.await.context("TLS ClientHello failed")?;

    let sni = start.client_hello().server_name().map(str::to_string);
    let certificate = resolver
        .resolve(sni.as_deref())
        .await
        .context("certificate resolution failed")?;

    let config = server_config(certificate.certified_key(), &settings)?;
    let tls = start
        .into_stream(config)
        .await
        .context("TLS handshake failed")?;

    let service = service_fn(move |request: Request<Incoming>| {
        let handler = handler.clone();
        async move { Ok::<_, Infallible>(handler.handle(request, peer).await) }
    });

    hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(TokioIo::new(tls), service)
        .await
        .map_err(|error| anyhow::anyhow!("connection error: {error}"))
}

#[cfg(test)]
mod tests {
    use honeycomb_cert::{Generator, SelfSignedGenerator};
    use honeycomb_name::ServerName;

    use super::*;

    #[test]
    fn per_connection_configs_advertise_h2_and_http11() {
        let generator = SelfSignedGenerator::ephemeral().unwrap();
        let certificate = generator
            .generate(&ServerName::parse("example.com").unwrap())
            .unwrap();

        let settings = TlsSettings {
            versions: vec![&rustls::version::TLS12, &rustls::version::TLS13],
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        };

        let config = server_config(certificate.certified_key(), &settings).unwrap();
        assert_eq!(
            config.alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
    }

    #[test]
    fn a_restricted_version_list_still_builds() {
        let generator = SelfSignedGenerator::ephemeral().unwrap();
        let certificate = generator
            .generate(&ServerName::parse("example.com").unwrap())
            .unwrap();

        let settings = TlsSettings {
            versions: vec![&rustls::version::TLS13],
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        };

        assert!(server_config(certificate.certified_key(), &settings).is_ok());
    }
}
