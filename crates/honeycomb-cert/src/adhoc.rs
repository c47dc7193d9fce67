use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use honeycomb_name::ServerName;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::info;

use crate::{CertError, Certificate, CertificateProvider, Generator};

/// How long before its `not_after` a cached certificate stops being served.
/// The margin avoids handing a client a certificate that expires while it is
/// still validating it, and absorbs some clock drift.
pub const DEFAULT_TTL_OFFSET: Duration = Duration::minutes(15);

type Cache = HashMap<String, Arc<Certificate>>;

/// A certificate provider that creates new certificates on the fly using a
/// certificate generator.
///
/// Reads are lock-free against an atomic snapshot of the cache. Issuance is
/// serialized behind a single lock: the first task to miss generates the
/// certificate, purges stale entries and publishes a new snapshot; tasks
/// that were waiting re-check the snapshot and reuse the fresh entry, so
/// exactly one certificate is issued per server name.
pub struct AdhocProvider {
    generator: Arc<dyn Generator>,
    ttl_offset: Duration,
    cache: ArcSwap<Cache>,
    write_lock: Mutex<()>,
}

impl AdhocProvider {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        AdhocProvider {
            generator,
            ttl_offset: DEFAULT_TTL_OFFSET,
            cache: ArcSwap::from_pointee(Cache::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Override how long before expiry a certificate is evicted.
    pub fn with_ttl_offset(mut self, ttl_offset: Duration) -> Self {
        if ttl_offset > Duration::ZERO {
            self.ttl_offset = ttl_offset;
        }
        self
    }

    fn fetch(&self, cache: &Cache, server_name: &ServerName) -> Option<Arc<Certificate>> {
        cache
            .get(&server_name.unicode)
            .filter(|certificate| !self.is_stale(certificate))
            .cloned()
    }

    fn is_stale(&self, certificate: &Certificate) -> bool {
        OffsetDateTime::now_utc() > certificate.not_after() - self.ttl_offset
    }

    /// A copy of the cache without its stale entries.
    fn purge(&self, cache: &Cache) -> Cache {
        let mut fresh = Cache::with_capacity(cache.len());

        for (unicode, certificate) in cache {
            if self.is_stale(certificate) {
                info!(
                    server_name = %unicode,
                    certificate = %certificate.describe(),
                    "expired adhoc certificate"
                );
            } else {
                fresh.insert(unicode.clone(), certificate.clone());
            }
        }

        fresh
    }

    async fn generate(&self, server_name: &ServerName) -> Result<Arc<Certificate>, CertError> {
        let _guard = self.write_lock.lock().await;

        // Another task may have issued the certificate while we were waiting
        // for the lock.
        if let Some(certificate) = self.fetch(&self.cache.load(), server_name) {
            return Ok(certificate);
        }

        let certificate = Arc::new(self.generator.generate(server_name)?);

        let mut fresh = self.purge(&self.cache.load());
        fresh.insert(server_name.unicode.clone(), certificate.clone());
        self.cache.store(Arc::new(fresh));

        info!(
            server_name = %server_name.unicode,
            certificate = %certificate.describe(),
            "issued adhoc certificate"
        );

        Ok(certificate)
    }
}

#[async_trait]
impl CertificateProvider for AdhocProvider {
    async fn get_existing(
        &self,
        server_name: &ServerName,
    ) -> Result<Option<Arc<Certificate>>, CertError> {
        Ok(self.fetch(&self.cache.load(), server_name))
    }

    async fn get(&self, server_name: &ServerName) -> Result<Option<Arc<Certificate>>, CertError> {
        if let Some(certificate) = self.fetch(&self.cache.load(), server_name) {
            return Ok(Some(certificate));
        }

        self.generate(server_name).await.map(Some)
    }
}
