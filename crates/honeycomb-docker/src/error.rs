use thiserror::Error;

/// Errors produced while talking to the Docker daemon or interpreting the
/// services it reports.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("unsupported Docker host '{0}', expected a unix:// or tcp:// address")]
    UnsupportedHost(String),

    #[error("failed to connect to the Docker daemon: {0}")]
    Connect(#[source] std::io::Error),

    #[error("Docker API request failed: {0}")]
    Request(#[from] hyper::Error),

    #[error("Docker API request could not be built: {0}")]
    InvalidRequest(#[from] http::Error),

    #[error("Docker API returned {status}: {message}")]
    Api {
        status: http::StatusCode,
        message: String,
    },

    #[error("failed to decode a Docker API response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("'{service}' is missing the '{label}' label")]
    MissingMatchLabel { service: String, label: String },

    #[error("invalid '{label}' label ({value}), expected a decimal port number")]
    InvalidPortLabel { label: String, value: String },

    #[error("invalid '{label}' label ({value}), expected enabled, disabled or insecure")]
    InvalidTlsLabel { label: String, value: String },

    #[error("'{image}' image does not expose any TCP ports")]
    NoExposedPorts { image: String },

    #[error("'{image}' image exposes multiple TCP ports ({ports}), add a '{label}' label to the service to select one")]
    MultipleExposedPorts {
        image: String,
        ports: String,
        label: String,
    },
}
