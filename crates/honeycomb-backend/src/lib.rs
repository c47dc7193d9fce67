//! Backend selection for the honeycomb proxy.
//!
//! A [`Locator`] maps a server name to a backend [`Endpoint`] together with a
//! match score. Locators compose: the proxy wires a [`CacheLocator`] around
//! an [`AggregateLocator`] over the static (environment-configured) and
//! Docker locators.

mod cache;
mod endpoint;
mod env;
mod locator;
mod static_locator;

pub use cache::CacheLocator;
pub use endpoint::{Endpoint, TlsMode};
pub use env::{routes_from_env, RouteConfigError};
pub use locator::{AggregateLocator, Location, Locator};
pub use static_locator::StaticLocator;
