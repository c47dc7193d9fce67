//! Docker swarm service discovery for the honeycomb proxy.
//!
//! Services advertise themselves as backends through labels: a pattern label
//! selects the server names routed to the service, and optional labels pick
//! the port, the TLS posture and a human-readable description. A background
//! task polls the Docker daemon and keeps an in-memory snapshot of the
//! routable services; whenever the snapshot changes it bumps a shared route
//! generation counter, which the locate cache watches to shed stale routes.

mod client;
mod error;
mod health;
mod inspector;
mod loader;
mod locator;

pub use client::{DockerClient, ImageInspect, Service};
pub use error::DockerError;
pub use health::{HealthChecker, HealthStatus, SwarmHealthChecker, DEFAULT_CHECK_TIMEOUT};
pub use inspector::{
    ServiceInspector, DESCRIPTION_LABEL, MATCH_LABEL, PORT_LABEL, TLS_LABEL,
};
pub use loader::{DockerServiceLoader, ServiceInfo, ServiceLoader};
pub use locator::{DockerLocator, DEFAULT_POLL_INTERVAL};
