use thiserror::Error;

/// Errors produced while loading, generating or resolving certificates.
#[derive(Debug, Error)]
pub enum CertError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed PEM data: {0}")]
    Pem(String),

    #[error("malformed certificate: {0}")]
    Parse(String),

    #[error("unusable private key: {0}")]
    Key(String),

    #[error("certificate generation failed: {0}")]
    Generate(String),

    #[error("certificate store error: {0}")]
    Store(String),

    #[error("timed out resolving a certificate")]
    Timeout,

    #[error("no certificate provider was able to provide a certificate for '{name}'")]
    NoCertificate { name: String },
}

impl From<rcgen::Error> for CertError {
    fn from(error: rcgen::Error) -> Self {
        CertError::Generate(error.to_string())
    }
}
