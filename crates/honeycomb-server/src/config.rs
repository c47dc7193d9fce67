use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rustls::crypto::CryptoProvider;
use rustls::SupportedProtocolVersion;
use tracing::warn;

/// Runtime configuration, taken from flags or the environment.
///
/// The environment variable names match the deployment surface the proxy has
/// always had, so existing service definitions keep working.
#[derive(Parser, Debug)]
#[command(name = "honeycomb", version)]
#[command(about = "TLS-terminating reverse proxy for Docker swarm services")]
pub struct Config {
    /// HTTPS listen port.
    #[arg(long, env = "PORT", default_value_t = 8443)]
    pub port: u16,

    /// Plaintext listen port; all requests are redirected to HTTPS.
    #[arg(long, env = "REDIRECT_PORT", default_value_t = 8080)]
    pub redirect_port: u16,

    /// Seconds between polls of the Docker service list.
    #[arg(long, env = "DOCKER_POLL_INTERVAL", default_value_t = 30)]
    pub docker_poll_interval: u64,

    /// Directory holding certificates and keys.
    #[arg(long, env = "CERTIFICATE_PATH", default_value = "/run/secrets/")]
    pub certificate_path: PathBuf,

    /// Issuer (CA) certificate used to sign adhoc certificates, relative to
    /// the certificate directory.
    #[arg(long, env = "ISSUER_CERT", default_value = "honeycomb-ca.crt")]
    pub issuer_cert: String,

    /// Issuer (CA) private key, relative to the certificate directory.
    #[arg(long, env = "ISSUER_KEY", default_value = "honeycomb-ca.key")]
    pub issuer_key: String,

    /// Default server certificate, relative to the certificate directory.
    #[arg(long, env = "SERVER_CERT", default_value = "honeycomb-server.crt")]
    pub server_cert: String,

    /// Default server key, relative to the certificate directory. Adhoc
    /// certificates reuse this key so public-key pinning survives replicas.
    #[arg(long, env = "SERVER_KEY", default_value = "honeycomb-server.key")]
    pub server_key: String,

    /// CA bundles trusted when verifying backend certificates.
    #[arg(
        long,
        env = "CA_PATH",
        value_delimiter = ',',
        default_value = "/app/etc/ca-bundle.pem,/run/secrets/ca-bundle.pem"
    )]
    pub ca_bundles: Vec<PathBuf>,

    /// Optional HTTP key-value certificate store, e.g.
    /// `http://certs.internal:8000/ssl`.
    #[arg(long, env = "CERT_STORE_URL")]
    pub cert_store_url: Option<String>,

    /// Seconds before a key-value store certificate is re-fetched.
    #[arg(long, env = "CERT_STORE_REFRESH", default_value_t = 60)]
    pub cert_store_refresh: u64,

    /// Minutes before expiry that an adhoc certificate is reissued.
    #[arg(long, env = "ADHOC_TTL_OFFSET", default_value_t = 15)]
    pub adhoc_ttl_offset: u64,

    /// Expect PROXY protocol v1/v2 framing on both listeners.
    #[arg(long, env = "PROXY_PROTOCOL", default_value_t = false)]
    pub proxy_protocol: bool,

    /// Milliseconds allowed for a health-check probe.
    #[arg(long, env = "CHECK_TIMEOUT", default_value_t = 500)]
    pub check_timeout: u64,

    /// Milliseconds allowed for dialing a backend.
    #[arg(long, env = "DIAL_TIMEOUT", default_value_t = 5000)]
    pub dial_timeout: u64,

    /// Minimum TLS protocol version (e.g. `1.2`, `tlsv1.3`).
    #[arg(long, env = "TLS_MIN_VERSION")]
    pub tls_min_version: Option<String>,

    /// Maximum TLS protocol version.
    #[arg(long, env = "TLS_MAX_VERSION")]
    pub tls_max_version: Option<String>,

    /// Colon-separated cipher suite allow-list (rustls suite names).
    #[arg(long, env = "TLS_CIPHER_SUITE")]
    pub tls_cipher_suite: Option<String>,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.docker_poll_interval.max(1))
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout.max(1))
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout.max(1))
    }

    pub fn cert_store_refresh(&self) -> Duration {
        Duration::from_secs(self.cert_store_refresh.max(1))
    }

    pub fn adhoc_ttl_offset(&self) -> time::Duration {
        time::Duration::minutes(self.adhoc_ttl_offset.max(1) as i64)
    }

    pub fn certificate_file(&self, name: &str) -> PathBuf {
        self.certificate_path.join(name)
    }

    /// The TLS protocol versions the listener accepts.
    pub fn protocol_versions(&self) -> Vec<&'static SupportedProtocolVersion> {
        let min = self
            .tls_min_version
            .as_deref()
            .map(version_rank)
            .unwrap_or(TLS12_RANK);
        let max = self
            .tls_max_version
            .as_deref()
            .map(version_rank)
            .unwrap_or(TLS13_RANK);

        let mut versions = Vec::new();
        if min <= TLS12_RANK && TLS12_RANK <= max {
            versions.push(&rustls::version::TLS12);
        }
        if min <= TLS13_RANK && TLS13_RANK <= max {
            versions.push(&rustls::version::TLS13);
        }

        if versions.is_empty() {
            warn!("TLS version bounds exclude every supported version, allowing TLS 1.2+");
            versions = vec![&rustls::version::TLS12, &rustls::version::TLS13];
        }

        versions
    }

    /// The crypto provider for the listener, with the cipher-suite allow-list
    /// applied.
    pub fn crypto_provider(&self) -> Arc<CryptoProvider> {
        let mut provider = rustls::crypto::ring::default_provider();

        if let Some(allow_list) = &self.tls_cipher_suite {
            let names: Vec<&str> = allow_list
                .split(':')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .collect();

            if !names.is_empty() {
                let filtered: Vec<_> = provider
                    .cipher_suites
                    .iter()
                    .copied()
                    .filter(|suite| {
                        let name = format!("{:?}", suite.suite());
                        names.iter().any(|n| n.eq_ignore_ascii_case(&name))
                    })
                    .collect();

                if filtered.is_empty() {
                    warn!(
                        allow_list,
                        "cipher suite allow-list matches nothing, keeping defaults"
                    );
                } else {
                    provider.cipher_suites = filtered;
                }
            }
        }

        Arc::new(provider)
    }
}

const TLS12_RANK: u8 = 2;
const TLS13_RANK: u8 = 3;

/// Map the accepted version spellings onto an ordering rank. Versions below
/// TLS 1.2 are not shipped by rustls and clamp to 1.2.
fn version_rank(value: &str) -> u8 {
    match value.to_lowercase().as_str() {
        "tlsv1.0" | "v1.0" | "1.0" | "1_0" | "tlsv1.1" | "v1.1" | "1.1" | "1_1" => {
            warn!(version = value, "TLS versions below 1.2 are unavailable, clamping to 1.2");
            TLS12_RANK
        }
        "tlsv1.3" | "v1.3" | "1.3" | "1_3" => TLS13_RANK,
        "tlsv1.2" | "v1.2" | "1.2" | "1_2" => TLS12_RANK,
        _ => {
            warn!(version = value, "unrecognized TLS version, assuming 1.2");
            TLS12_RANK
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(args: &[&str]) -> Config {
        let mut full = vec!["honeycomb"];
        full.extend_from_slice(args);
        Config::try_parse_from(full).unwrap()
    }

    #[test]
    fn defaults_match_the_deployment_surface() {
        let cfg = config(&[]);
        assert_eq!(cfg.port, 8443);
        assert_eq!(cfg.redirect_port, 8080);
        assert_eq!(cfg.docker_poll_interval, 30);
        assert_eq!(cfg.certificate_path, PathBuf::from("/run/secrets/"));
        assert!(!cfg.proxy_protocol);
        assert_eq!(cfg.ca_bundles.len(), 2);
    }

    #[test]
    fn version_bounds_select_protocols() {
        let cfg = config(&["--tls-min-version", "1.3"]);
        let versions = cfg.protocol_versions();
        assert_eq!(versions.len(), 1);

        let cfg = config(&["--tls-max-version", "1.2"]);
        let versions = cfg.protocol_versions();
        assert_eq!(versions.len(), 1);

        let cfg = config(&[]);
        assert_eq!(cfg.protocol_versions().len(), 2);
    }

    #[test]
    fn old_tls_versions_clamp_to_12() {
        assert_eq!(version_rank("tlsv1.0"), TLS12_RANK);
        assert_eq!(version_rank("1_1"), TLS12_RANK);
        assert_eq!(version_rank("1.3"), TLS13_RANK);
    }

    #[test]
    fn cipher_suite_allow_list_filters_the_provider() {
        let cfg = config(&["--tls-cipher-suite", "TLS13_AES_256_GCM_SHA384"]);
        let provider = cfg.crypto_provider();
        assert_eq!(provider.cipher_suites.len(), 1);

        // A list that matches nothing keeps the defaults.
        let cfg = config(&["--tls-cipher-suite", "NO_SUCH_SUITE"]);
        let provider = cfg.crypto_provider();
        assert!(provider.cipher_suites.len() > 1);
    }
}
