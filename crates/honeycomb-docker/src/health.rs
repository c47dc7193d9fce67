use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::DockerClient;

/// The result of a health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "health-check {}: {}",
            if self.healthy { "passed" } else { "failed" },
            self.message,
        )
    }
}

/// Queries the health of the server's dependencies.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self) -> HealthStatus;
}

/// Default time budget for a health check probe.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_millis(500);

/// A health checker that pings the Docker daemon.
pub struct SwarmHealthChecker {
    client: Arc<DockerClient>,
    timeout: Duration,
}

impl SwarmHealthChecker {
    pub fn new(client: Arc<DockerClient>) -> Self {
        SwarmHealthChecker {
            client,
            timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if timeout > Duration::ZERO {
            self.timeout = timeout;
        }
        self
    }
}

#[async_trait]
impl HealthChecker for SwarmHealthChecker {
    async fn check(&self) -> HealthStatus {
        match tokio::time::timeout(self.timeout, self.client.ping()).await {
            Ok(Ok(())) => HealthStatus {
                healthy: true,
                message: "the Docker daemon is reachable".to_string(),
            },
            Ok(Err(error)) => HealthStatus {
                healthy: false,
                message: error.to_string(),
            },
            Err(_) => HealthStatus {
                healthy: false,
                message: format!("the Docker daemon did not respond within {:?}", self.timeout),
            },
        }
    }
}
