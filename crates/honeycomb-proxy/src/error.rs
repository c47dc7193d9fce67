use http::StatusCode;
use thiserror::Error;

/// Everything that can go wrong while proxying one request.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    InvalidName(#[from] honeycomb_name::InvalidName),

    #[error("could not locate backend for '{name}'")]
    NotRouted { name: String },

    #[error("could not connect to the backend: {0}")]
    UpstreamDial(String),

    #[error("backend request failed: {0}")]
    UpstreamIo(String),

    #[error("malformed backend response: {0}")]
    UpstreamProtocol(String),

    #[error("client connection can not be hijacked")]
    HijackUnsupported,

    #[error("the response writer is closed")]
    WriterClosed,
}

impl ProxyError {
    /// The HTTP status rendered when the error occurs before any response
    /// bytes have been sent.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidName(_) | ProxyError::NotRouted { .. } => StatusCode::NOT_FOUND,
            ProxyError::UpstreamDial(_)
            | ProxyError::UpstreamIo(_)
            | ProxyError::UpstreamProtocol(_) => StatusCode::BAD_GATEWAY,
            ProxyError::HijackUnsupported | ProxyError::WriterClosed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_error_class() {
        assert_eq!(
            ProxyError::NotRouted {
                name: "x".to_string()
            }
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ProxyError::UpstreamDial("refused".to_string()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::HijackUnsupported.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
