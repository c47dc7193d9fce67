use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use honeycomb_name::ServerName;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{Certificate, CertError, CertificateLoader};

/// Fetches or creates TLS certificates for incoming HTTPS requests.
#[async_trait]
pub trait CertificateProvider: Send + Sync {
    /// Fetch an existing certificate for the given server name. Never issues
    /// new certificates; `None` means no certificate was found, an error
    /// means the provider itself failed.
    async fn get_existing(
        &self,
        server_name: &ServerName,
    ) -> Result<Option<Arc<Certificate>>, CertError>;

    /// Fetch an existing certificate, or issue a new one when the provider
    /// supports issuance.
    async fn get(&self, server_name: &ServerName) -> Result<Option<Arc<Certificate>>, CertError>;
}

/// The lookup keys probed for a server name, from most to least specific:
/// the name itself, then for every parent domain a `_.`-prefixed wildcard
/// entry followed by the parent itself.
pub fn candidate_keys(punycode: &str) -> Vec<String> {
    let mut keys = vec![punycode.to_string()];
    let mut tail = punycode;

    while let Some((_, rest)) = tail.split_once('.') {
        keys.push(format!("_.{rest}"));
        keys.push(rest.to_string());
        tail = rest;
    }

    keys
}

struct CachedCertificate {
    certificate: Arc<Certificate>,
    loaded_at: Instant,
}

/// A provider that reads certificates from a [`CertificateLoader`].
///
/// Results are cached per server name. Without a refresh interval the cache
/// is authoritative once populated; with one, entries older than the
/// interval are re-fetched from the loader, and a loader failure falls back
/// to the stale cached value so a transient store outage does not interrupt
/// TLS.
pub struct LoaderProvider {
    loader: Arc<dyn CertificateLoader>,
    refresh: Option<Duration>,
    cache: RwLock<HashMap<String, CachedCertificate>>,
}

impl LoaderProvider {
    pub fn new(loader: Arc<dyn CertificateLoader>) -> Self {
        LoaderProvider {
            loader,
            refresh: None,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Re-probe the loader for entries older than `interval`.
    pub fn with_refresh(mut self, interval: Duration) -> Self {
        if interval > Duration::ZERO {
            self.refresh = Some(interval);
        }
        self
    }

    async fn cached(&self, server_name: &ServerName, include_stale: bool) -> Option<Arc<Certificate>> {
        let cache = self.cache.read().await;
        let entry = cache.get(&server_name.unicode)?;

        let fresh = match self.refresh {
            None => true,
            Some(interval) => entry.loaded_at.elapsed() < interval,
        };

        if fresh || include_stale {
            Some(entry.certificate.clone())
        } else {
            None
        }
    }

    async fn probe(&self, server_name: &ServerName) -> Result<Option<Arc<Certificate>>, CertError> {
        let mut loader_error: Option<CertError> = None;

        for key in candidate_keys(&server_name.punycode) {
            let pair = match self.loader.load(&key).await {
                Ok(Some(pair)) => pair,
                Ok(None) => continue,
                Err(error) => {
                    // The store failed for this key; remember the error but
                    // keep probing the remaining candidates.
                    debug!(%key, %error, "certificate loader failed");
                    loader_error = Some(error);
                    continue;
                }
            };

            let certificate = match Certificate::from_pem(&pair.certificate, &pair.key) {
                Ok(certificate) => certificate,
                Err(error) => {
                    warn!(%key, %error, "ignoring unparseable certificate");
                    continue;
                }
            };

            if !certificate.verify_hostname(&server_name.punycode) {
                debug!(
                    %key,
                    server_name = %server_name.unicode,
                    "certificate ignored, hostname mismatch"
                );
                continue;
            }

            info!(
                %key,
                server_name = %server_name.unicode,
                certificate = %certificate.describe(),
                "loaded certificate"
            );

            let certificate = Arc::new(certificate);
            let mut cache = self.cache.write().await;
            cache.insert(
                server_name.unicode.clone(),
                CachedCertificate {
                    certificate: certificate.clone(),
                    loaded_at: Instant::now(),
                },
            );

            return Ok(Some(certificate));
        }

        if let Some(error) = loader_error {
            // Soft-fail: an outage of the backing store keeps serving the
            // last known certificate.
            if let Some(stale) = self.cached(server_name, true).await {
                warn!(
                    server_name = %server_name.unicode,
                    "certificate store unavailable, serving cached certificate"
                );
                return Ok(Some(stale));
            }

            return Err(error);
        }

        Ok(None)
    }
}

#[async_trait]
impl CertificateProvider for LoaderProvider {
    async fn get_existing(
        &self,
        server_name: &ServerName,
    ) -> Result<Option<Arc<Certificate>>, CertError> {
        if let Some(certificate) = self.cached(server_name, false).await {
            return Ok(Some(certificate));
        }

        self.probe(server_name).await
    }

    async fn get(&self, server_name: &ServerName) -> Result<Option<Arc<Certificate>>, CertError> {
        // Loaders can not issue certificates.
        self.get_existing(server_name).await
    }
}
