use std::sync::Arc;
use std::time::Duration;

use honeycomb_backend::Locator;
use honeycomb_name::ServerName;
use tracing::debug;

use crate::{CertError, Certificate, CertificateProvider};

/// The maximum time allowed for resolving a certificate during a handshake.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// How the provider chain is consulted for one request.
///
/// Whether a server name is recognized is a property of the request, not of
/// any particular provider: recognized names must never trigger adhoc
/// issuance, so their requests run in existing-only mode, while unrecognized
/// names run in issue-ok mode and may mint a certificate at the end of the
/// chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolveMode {
    /// Serve what already exists (loaders may still probe their stores).
    ExistingOnly,
    /// Providers that can issue are allowed to.
    IssueOk,
}

/// Resolves the certificate served for a TLS handshake.
///
/// Providers form a single ordered chain, most authoritative first: the
/// operator's loader-backed providers, then the adhoc issuer. The first
/// certificate (or the first provider error) wins. A missing or unparseable
/// SNI falls back to the default certificate so the request can at least
/// reach an HTTP error page.
pub struct CertificateResolver {
    providers: Vec<Arc<dyn CertificateProvider>>,
    locator: Arc<dyn Locator>,
    default_certificate: Arc<Certificate>,
    timeout: Duration,
}

impl CertificateResolver {
    pub fn new(
        providers: Vec<Arc<dyn CertificateProvider>>,
        locator: Arc<dyn Locator>,
        default_certificate: Arc<Certificate>,
    ) -> Self {
        CertificateResolver {
            providers,
            locator,
            default_certificate,
            timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if timeout > Duration::ZERO {
            self.timeout = timeout;
        }
        self
    }

    pub fn default_certificate(&self) -> Arc<Certificate> {
        self.default_certificate.clone()
    }

    /// Resolve the certificate for a ClientHello's SNI value.
    pub async fn resolve(&self, sni: Option<&str>) -> Result<Arc<Certificate>, CertError> {
        // Without a usable SNI the default certificate is served; the
        // request then proceeds far enough to render an error page.
        let Some(raw) = sni else {
            return Ok(self.default_certificate.clone());
        };

        let server_name = match ServerName::parse(raw) {
            Ok(server_name) => server_name,
            Err(error) => {
                debug!(sni = %raw, %error, "unparseable SNI, serving default certificate");
                return Ok(self.default_certificate.clone());
            }
        };

        match tokio::time::timeout(self.timeout, self.resolve_name(&server_name)).await {
            Ok(result) => result,
            Err(_) => Err(CertError::Timeout),
        }
    }

    async fn resolve_name(&self, server_name: &ServerName) -> Result<Arc<Certificate>, CertError> {
        let recognized = self.locator.locate(server_name).await.is_recognized();
        self.walk_chain(server_name, recognized).await
    }

    /// Walk the provider chain in one call mode, chosen by whether the
    /// request's server name is recognized.
    async fn walk_chain(
        &self,
        server_name: &ServerName,
        recognized: bool,
    ) -> Result<Arc<Certificate>, CertError> {
        let mode = if recognized {
            ResolveMode::ExistingOnly
        } else {
            ResolveMode::IssueOk
        };

        for provider in &self.providers {
            let certificate = match mode {
                ResolveMode::ExistingOnly => provider.get_existing(server_name).await?,
                ResolveMode::IssueOk => provider.get(server_name).await?,
            };

            if let Some(certificate) = certificate {
                return Ok(certificate);
            }
        }

        Err(CertError::NoCertificate {
            name: server_name.unicode.clone(),
        })
    }
}
