use std::sync::Arc;

use honeycomb_name::ServerName;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, Ia5String,
    KeyUsagePurpose, KeyPair, SanType, SerialNumber,
};
use rustls::crypto::ring::sign::any_supported_type;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::SigningKey;
use time::{Duration, OffsetDateTime};

use crate::{CertError, Certificate};

/// Offset added to the current time to produce a new leaf's `not_before`.
/// Negative to allow for clock drift between client and server.
pub const DEFAULT_NOT_BEFORE_OFFSET: Duration = Duration::minutes(-15);

/// Offset added to the current time to produce a new leaf's `not_after`.
pub const DEFAULT_NOT_AFTER_OFFSET: Duration = Duration::hours(24);

/// Creates new TLS certificates.
pub trait Generator: Send + Sync {
    /// Create a new certificate for the given server name.
    fn generate(&self, server_name: &ServerName) -> Result<Certificate, CertError>;
}

/// The shared leaf template: CN carries the Unicode name, the SAN carries the
/// Punycode name.
fn leaf_params(
    server_name: &ServerName,
    not_before_offset: Duration,
    not_after_offset: Duration,
) -> Result<CertificateParams, CertError> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, server_name.unicode.clone());
    params.distinguished_name = dn;

    let san = Ia5String::try_from(server_name.punycode.as_str())
        .map_err(|e| CertError::Generate(e.to_string()))?;
    params.subject_alt_names = vec![SanType::DnsName(san)];

    params.serial_number = Some(SerialNumber::from(rand::random::<u64>()));

    let now = OffsetDateTime::now_utc();
    params.not_before = now + not_before_offset;
    params.not_after = now + not_after_offset;

    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    Ok(params)
}

fn signing_key_for(key_pair: &KeyPair) -> Result<Arc<dyn SigningKey>, CertError> {
    let der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    any_supported_type(&der).map_err(|e| CertError::Key(e.to_string()))
}

/// Generates server certificates signed by a separate issuer certificate,
/// typically a self-signed CA distributed to clients out of band.
///
/// All leaves share one fixed server key so that public-key pinning keeps
/// working across replicas.
pub struct IssuerSignedGenerator {
    issuer: rcgen::Certificate,
    issuer_key: KeyPair,
    issuer_chain: Vec<CertificateDer<'static>>,
    server_key: KeyPair,
    server_signing_key: Arc<dyn SigningKey>,
    not_before_offset: Duration,
    not_after_offset: Duration,
}

impl IssuerSignedGenerator {
    /// Build a generator from PEM-encoded issuer certificate, issuer key and
    /// server key.
    pub fn from_pem(
        issuer_cert_pem: &str,
        issuer_key_pem: &str,
        server_key_pem: &str,
    ) -> Result<Self, CertError> {
        let issuer_key = KeyPair::from_pem(issuer_key_pem)?;
        let issuer = CertificateParams::from_ca_cert_pem(issuer_cert_pem)?.self_signed(&issuer_key)?;

        let issuer_chain = rustls_pemfile::certs(&mut issuer_cert_pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CertError::Pem(e.to_string()))?;
        if issuer_chain.is_empty() {
            return Err(CertError::Pem("no issuer certificate found".to_string()));
        }

        let server_key = KeyPair::from_pem(server_key_pem)?;
        let server_signing_key = signing_key_for(&server_key)?;

        Ok(IssuerSignedGenerator {
            issuer,
            issuer_key,
            issuer_chain,
            server_key,
            server_signing_key,
            not_before_offset: DEFAULT_NOT_BEFORE_OFFSET,
            not_after_offset: DEFAULT_NOT_AFTER_OFFSET,
        })
    }

    pub fn with_validity(mut self, not_before_offset: Duration, not_after_offset: Duration) -> Self {
        self.not_before_offset = not_before_offset;
        self.not_after_offset = not_after_offset;
        self
    }
}

impl Generator for IssuerSignedGenerator {
    fn generate(&self, server_name: &ServerName) -> Result<Certificate, CertError> {
        let params = leaf_params(server_name, self.not_before_offset, self.not_after_offset)?;
        let leaf = params.signed_by(&self.server_key, &self.issuer, &self.issuer_key)?;

        let mut chain = vec![leaf.der().clone()];
        chain.extend(self.issuer_chain.iter().cloned());

        Certificate::new(chain, self.server_signing_key.clone())
    }
}

/// Generates self-signed server certificates.
pub struct SelfSignedGenerator {
    key: KeyPair,
    signing_key: Arc<dyn SigningKey>,
    not_before_offset: Duration,
    not_after_offset: Duration,
}

impl SelfSignedGenerator {
    pub fn from_pem(key_pem: &str) -> Result<Self, CertError> {
        let key = KeyPair::from_pem(key_pem)?;
        Self::with_key(key)
    }

    /// Build a generator around a freshly generated key.
    pub fn ephemeral() -> Result<Self, CertError> {
        Self::with_key(KeyPair::generate()?)
    }

    fn with_key(key: KeyPair) -> Result<Self, CertError> {
        let signing_key = signing_key_for(&key)?;
        Ok(SelfSignedGenerator {
            key,
            signing_key,
            not_before_offset: DEFAULT_NOT_BEFORE_OFFSET,
            not_after_offset: DEFAULT_NOT_AFTER_OFFSET,
        })
    }

    pub fn with_validity(mut self, not_before_offset: Duration, not_after_offset: Duration) -> Self {
        self.not_before_offset = not_before_offset;
        self.not_after_offset = not_after_offset;
        self
    }
}

impl Generator for SelfSignedGenerator {
    fn generate(&self, server_name: &ServerName) -> Result<Certificate, CertError> {
        let params = leaf_params(server_name, self.not_before_offset, self.not_after_offset)?;
        let leaf = params.self_signed(&self.key)?;

        Certificate::new(vec![leaf.der().clone()], self.signing_key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(raw: &str) -> ServerName {
        ServerName::parse(raw).unwrap()
    }

    #[test]
    fn self_signed_leaves_carry_the_template_fields() {
        let generator = SelfSignedGenerator::ephemeral().unwrap();
        let certificate = generator.generate(&name("dev.example.com")).unwrap();

        assert_eq!(certificate.subject_common_name(), "dev.example.com");
        assert!(certificate.verify_hostname("dev.example.com"));

        let lifetime = certificate.not_after() - certificate.not_before();
        assert_eq!(lifetime, Duration::hours(24) + Duration::minutes(15));
    }

    #[test]
    fn issuer_signed_leaves_chain_to_the_issuer() {
        // Create a CA with rcgen, round-trip it through PEM, then sign with it.
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "honeycomb test ca");
        ca_params.distinguished_name = dn;
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let server_key = KeyPair::generate().unwrap();

        let generator = IssuerSignedGenerator::from_pem(
            &ca_cert.pem(),
            &ca_key.serialize_pem(),
            &server_key.serialize_pem(),
        )
        .unwrap();

        let certificate = generator.generate(&name("svc.example.com")).unwrap();
        assert_eq!(certificate.subject_common_name(), "svc.example.com");
        assert_eq!(certificate.issuer_common_name(), "honeycomb test ca");
        assert!(certificate.verify_hostname("svc.example.com"));
    }

    #[test]
    fn validity_offsets_are_configurable() {
        let generator = SelfSignedGenerator::ephemeral()
            .unwrap()
            .with_validity(Duration::ZERO, Duration::hours(1));
        let certificate = generator.generate(&name("short.example.com")).unwrap();

        let lifetime = certificate.not_after() - certificate.not_before();
        assert_eq!(lifetime, Duration::hours(1));
    }
}
