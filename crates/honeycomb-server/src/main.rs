//! honeycomb: a TLS-terminating reverse proxy for Docker swarm services.
//!
//! Backends come from two registries: `ROUTE_*` environment variables and
//! Docker services labelled with `honeycomb.match`. Certificates come from
//! disk, an optional key-value store, or are issued on the fly by signing
//! with a local CA.

mod config;
mod health;
mod proxyproto;
mod redirect;
mod tls;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use honeycomb_backend::{routes_from_env, AggregateLocator, CacheLocator, Locator};
use honeycomb_cert::{
    AdhocProvider, Certificate, CertificateProvider, CertificateResolver, FileLoader, HttpKvStore,
    IssuerSignedGenerator, KvLoader, LoaderProvider,
};
use honeycomb_docker::{
    DockerClient, DockerLocator, DockerServiceLoader, SwarmHealthChecker,
};
use honeycomb_proxy::{ProxyHandler, UpstreamConnector};
use rustls::RootCertStore;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::health::FrontendHandler;
use crate::tls::TlsSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The ring provider backs both the listener and the upstream connectors.
    let _ = rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider());

    let config = Config::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "honeycomb starting");

    // Routing: static routes from the environment, dynamic routes from
    // Docker, a shared cache in front of both.
    let static_locator =
        routes_from_env(std::env::vars()).context("invalid ROUTE_* configuration")?;

    let docker_client = Arc::new(DockerClient::from_env()?);
    let service_loader = Arc::new(DockerServiceLoader::new(docker_client.clone()));

    // The poller and the locate cache share only this counter: the poller
    // bumps it when the service list changes, the cache re-checks it on
    // every locate.
    let route_generation = Arc::new(AtomicU64::new(0));

    let docker_locator = Arc::new(
        DockerLocator::new(service_loader)
            .with_poll_interval(config.poll_interval())
            .with_invalidation(route_generation.clone()),
    );

    let aggregate = AggregateLocator::new(vec![
        Arc::new(static_locator) as Arc<dyn Locator>,
        docker_locator.clone() as Arc<dyn Locator>,
    ]);
    let locator = Arc::new(CacheLocator::new(Arc::new(aggregate)).with_generation(route_generation));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let docker_locator = docker_locator.clone();
        tokio::spawn(async move {
            docker_locator.run(shutdown_rx).await;
        });
    }

    // Certificates: one ordered provider chain, operator-supplied sources
    // ahead of the adhoc issuer.
    let default_certificate = load_default_certificate(&config)?;
    let providers = certificate_providers(&config)?;

    let resolver = Arc::new(CertificateResolver::new(
        providers,
        locator.clone() as Arc<dyn Locator>,
        default_certificate,
    ));

    // The request plane.
    let connector =
        UpstreamConnector::new(root_store(&config)).with_dial_timeout(config.dial_timeout());
    let proxy = Arc::new(ProxyHandler::new(
        locator.clone() as Arc<dyn Locator>,
        connector,
    ));

    let checker = Arc::new(
        SwarmHealthChecker::new(docker_client.clone()).with_timeout(config.check_timeout()),
    );
    let frontend = Arc::new(FrontendHandler::new(proxy, Some(checker)));

    let settings = Arc::new(TlsSettings {
        versions: config.protocol_versions(),
        provider: config.crypto_provider(),
    });

    // The plaintext listener only redirects.
    {
        let redirect_port = config.redirect_port;
        let proxy_protocol = config.proxy_protocol;
        tokio::spawn(async move {
            if let Err(error) = redirect::serve(redirect_port, proxy_protocol).await {
                warn!(%error, "redirect listener failed");
            }
        });
    }

    let serve = tls::serve(
        config.port,
        config.proxy_protocol,
        resolver,
        settings,
        frontend,
    );

    tokio::select! {
        result = serve => {
            let _ = shutdown_tx.send(true);
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            let _ = shutdown_tx.send(true);
            Ok(())
        }
    }
}

fn load_default_certificate(config: &Config) -> anyhow::Result<Arc<Certificate>> {
    let cert_path = config.certificate_file(&config.server_cert);
    let key_path = config.certificate_file(&config.server_key);

    let cert_pem = std::fs::read(&cert_path)
        .with_context(|| format!("failed to read {}", cert_path.display()))?;
    let key_pem = std::fs::read(&key_path)
        .with_context(|| format!("failed to read {}", key_path.display()))?;

    let certificate = Certificate::from_pem(&cert_pem, &key_pem)
        .context("failed to load the default certificate")?;

    info!(certificate = %certificate.describe(), "loaded default certificate");

    Ok(Arc::new(certificate))
}

/// The certificate provider chain, most authoritative first: the
/// certificate directory, the optional key-value store, and the adhoc
/// issuer. The resolver decides per request whether the chain may issue.
fn certificate_providers(
    config: &Config,
) -> anyhow::Result<Vec<Arc<dyn CertificateProvider>>> {
    let mut providers: Vec<Arc<dyn CertificateProvider>> = vec![Arc::new(LoaderProvider::new(
        Arc::new(FileLoader::new(config.certificate_path.clone())),
    ))];

    if let Some(url) = &config.cert_store_url {
        match HttpKvStore::new(url) {
            Ok(store) => {
                providers.push(Arc::new(
                    LoaderProvider::new(Arc::new(KvLoader::new(Arc::new(store))))
                        .with_refresh(config.cert_store_refresh()),
                ));
                info!(url, "certificate store enabled");
            }
            Err(error) => {
                warn!(url, %error, "ignoring unusable certificate store");
            }
        }
    }

    let issuer_cert = config.certificate_file(&config.issuer_cert);
    let issuer_key = config.certificate_file(&config.issuer_key);
    let server_key = config.certificate_file(&config.server_key);

    let issuer_cert_pem = std::fs::read_to_string(&issuer_cert)
        .with_context(|| format!("failed to read {}", issuer_cert.display()))?;
    let issuer_key_pem = std::fs::read_to_string(&issuer_key)
        .with_context(|| format!("failed to read {}", issuer_key.display()))?;
    let server_key_pem = std::fs::read_to_string(&server_key)
        .with_context(|| format!("failed to read {}", server_key.display()))?;

    let generator =
        IssuerSignedGenerator::from_pem(&issuer_cert_pem, &issuer_key_pem, &server_key_pem)
            .context("failed to initialize the adhoc certificate issuer")?;

    providers.push(Arc::new(
        AdhocProvider::new(Arc::new(generator)).with_ttl_offset(config.adhoc_ttl_offset()),
    ));

    Ok(providers)
}

/// Trust roots for verifying backend certificates. Missing or unreadable
/// bundle files are skipped; the proxy still starts without outbound trust.
fn root_store(config: &Config) -> RootCertStore {
    let mut roots = RootCertStore::empty();

    for bundle in &config.ca_bundles {
        let pem = match std::fs::read(bundle) {
            Ok(pem) => pem,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
            Err(error) => {
                warn!(bundle = %bundle.display(), %error, "failed to read CA bundle");
                continue;
            }
        };

        let certificates: Vec<_> = rustls_pemfile::certs(&mut &pem[..])
            .filter_map(Result::ok)
            .collect();
        let (added, _) = roots.add_parsable_certificates(certificates);

        info!(
            bundle = %bundle.display(),
            count = added,
            "loaded CA bundle"
        );
    }

    roots
}
