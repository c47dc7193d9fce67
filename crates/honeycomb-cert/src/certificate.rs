use std::sync::Arc;

use rustls::crypto::ring::sign::any_supported_type;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::{CertifiedKey, SigningKey};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

use crate::CertError;

/// A parsed server certificate: the rustls key material plus the leaf
/// metadata the proxy needs for caching and hostname verification.
#[derive(Debug)]
pub struct Certificate {
    certified: Arc<CertifiedKey>,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    subject_common_name: String,
    issuer_common_name: String,
    dns_names: Vec<String>,
}

impl Certificate {
    /// Build a certificate from a DER chain (leaf first) and its private key.
    pub fn from_der(
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<Self, CertError> {
        let signing_key = any_supported_type(&key).map_err(|e| CertError::Key(e.to_string()))?;
        Self::new(chain, signing_key)
    }

    /// Build a certificate from a DER chain and a prepared signing key.
    pub fn new(
        chain: Vec<CertificateDer<'static>>,
        signing_key: Arc<dyn SigningKey>,
    ) -> Result<Self, CertError> {
        let leaf = chain
            .first()
            .ok_or_else(|| CertError::Parse("empty certificate chain".to_string()))?;

        let (_, parsed) = X509Certificate::from_der(leaf.as_ref())
            .map_err(|e| CertError::Parse(e.to_string()))?;

        let subject_common_name = common_name(parsed.subject());
        let issuer_common_name = common_name(parsed.issuer());

        let dns_names = match parsed.subject_alternative_name() {
            Ok(Some(san)) => san
                .value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        let not_before = parsed.validity().not_before.to_datetime();
        let not_after = parsed.validity().not_after.to_datetime();

        Ok(Certificate {
            certified: Arc::new(CertifiedKey::new(chain, signing_key)),
            not_before,
            not_after,
            subject_common_name,
            issuer_common_name,
            dns_names,
        })
    }

    /// Build a certificate from PEM-encoded chain and key.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, CertError> {
        let chain = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CertError::Pem(e.to_string()))?;
        if chain.is_empty() {
            return Err(CertError::Pem("no certificates found".to_string()));
        }

        let key = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|e| CertError::Pem(e.to_string()))?
            .ok_or_else(|| CertError::Pem("no private key found".to_string()))?;

        Self::from_der(chain, key)
    }

    /// The rustls key material served during handshakes.
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        self.certified.clone()
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    pub fn subject_common_name(&self) -> &str {
        &self.subject_common_name
    }

    pub fn issuer_common_name(&self) -> &str {
        &self.issuer_common_name
    }

    /// Check whether the leaf is valid for the given ASCII host name.
    ///
    /// Matching follows the usual X.509 rules: the SAN DNS names are
    /// consulted when present, otherwise the subject common name; a
    /// `*.`-prefixed name matches exactly one extra label.
    pub fn verify_hostname(&self, punycode: &str) -> bool {
        if self.dns_names.is_empty() {
            return hostname_matches(&self.subject_common_name, punycode);
        }

        self.dns_names
            .iter()
            .any(|pattern| hostname_matches(pattern, punycode))
    }

    /// A one-line description for log messages.
    pub fn describe(&self) -> String {
        let expires = self
            .not_after
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.not_after.to_string());

        format!(
            "'{}', expires at {}, issued by '{}'",
            self.subject_common_name, expires, self.issuer_common_name,
        )
    }
}

fn common_name(name: &x509_parser::x509::X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn hostname_matches(pattern: &str, host: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        // One extra label, nothing more.
        match host.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest.eq_ignore_ascii_case(suffix),
            None => false,
        }
    } else {
        pattern.eq_ignore_ascii_case(host)
    }
}
