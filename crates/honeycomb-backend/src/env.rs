use honeycomb_name::PatternError;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{Endpoint, StaticLocator, TlsMode};

/// A `ROUTE_*` environment variable could not be parsed.
#[derive(Debug, Error)]
pub enum RouteConfigError {
    #[error("route '{variable}' has a malformed value, expected '<pattern> <url> [description]'")]
    Malformed { variable: String },

    #[error("route '{variable}': {source}")]
    InvalidPattern {
        variable: String,
        source: PatternError,
    },

    #[error("route '{variable}': invalid backend URL: {source}")]
    InvalidUrl {
        variable: String,
        source: url::ParseError,
    },
}

/// Build a static locator from `ROUTE_<TAG>` environment variables.
///
/// Each variable has the form `ROUTE_<TAG>=<pattern> <url>[ <description>]`.
/// The URL scheme selects the TLS mode (`https`/`wss` enabled, `http`/`ws`
/// disabled); a missing port defaults to 443 for TLS and 80 otherwise; the
/// description defaults to the tag. Variables that do not start with `ROUTE_`
/// are ignored.
pub fn routes_from_env<I>(vars: I) -> Result<StaticLocator, RouteConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut locator = StaticLocator::new();

    for (key, value) in vars {
        let Some(tag) = key.strip_prefix("ROUTE_") else {
            continue;
        };
        if tag.is_empty() || tag.contains(char::is_whitespace) {
            continue;
        }

        // Entries that do not look like `<pattern> <url> ...` are ignored the
        // same way unrelated environment variables are.
        let mut parts = value.splitn(3, ' ');
        let (pattern, address) = match (parts.next(), parts.next()) {
            (Some(pattern), Some(address)) if !pattern.is_empty() && !address.is_empty() => {
                (pattern, address)
            }
            _ => continue,
        };
        let description = parts.next().filter(|d| !d.is_empty());

        let url = Url::parse(address).map_err(|source| RouteConfigError::InvalidUrl {
            variable: key.clone(),
            source,
        })?;

        let tls_mode = if url.scheme().eq_ignore_ascii_case("https")
            || url.scheme().eq_ignore_ascii_case("wss")
        {
            TlsMode::Enabled
        } else {
            TlsMode::Disabled
        };

        let host = url.host_str().ok_or_else(|| RouteConfigError::Malformed {
            variable: key.clone(),
        })?;
        let port = url.port().unwrap_or(match tls_mode {
            TlsMode::Disabled => 80,
            _ => 443,
        });

        let endpoint = Endpoint {
            description: description.unwrap_or(tag).to_string(),
            address: format!("{host}:{port}"),
            tls_mode,
        };

        info!(
            pattern,
            address = %endpoint.address,
            description = %endpoint.description,
            "added static route"
        );

        locator
            .push(pattern, Some(endpoint))
            .map_err(|source| RouteConfigError::InvalidPattern {
                variable: key.clone(),
                source,
            })?;
    }

    Ok(locator)
}

#[cfg(test)]
mod tests {
    use honeycomb_name::ServerName;

    use super::*;
    use crate::Locator;

    fn vars(entries: &[(&str, &str)]) -> Vec<(String, String)> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn single_route(value: &str) -> Endpoint {
        let locator = routes_from_env(vars(&[("ROUTE_FOO", value)])).unwrap();
        let location = locator
            .locate(&ServerName::parse("foo.com").unwrap())
            .await;
        location.endpoint.unwrap()
    }

    #[tokio::test]
    async fn https_routes_enable_tls() {
        let endpoint = single_route("foo.* https://foo.backend.com:1234").await;
        assert_eq!(endpoint.address, "foo.backend.com:1234");
        assert_eq!(endpoint.tls_mode, TlsMode::Enabled);
        assert_eq!(endpoint.description, "FOO");
    }

    #[tokio::test]
    async fn http_routes_disable_tls() {
        let endpoint = single_route("foo.* http://foo.backend.com:1234").await;
        assert_eq!(endpoint.tls_mode, TlsMode::Disabled);
    }

    #[tokio::test]
    async fn wss_routes_enable_tls() {
        let endpoint = single_route("foo.* wss://foo.backend.com:1234").await;
        assert_eq!(endpoint.tls_mode, TlsMode::Enabled);
    }

    #[tokio::test]
    async fn ws_routes_disable_tls() {
        let endpoint = single_route("foo.* ws://foo.backend.com:1234").await;
        assert_eq!(endpoint.tls_mode, TlsMode::Disabled);
    }

    #[tokio::test]
    async fn tls_port_defaults_to_443() {
        let endpoint = single_route("foo.* https://foo.backend.com").await;
        assert_eq!(endpoint.address, "foo.backend.com:443");
    }

    #[tokio::test]
    async fn plaintext_port_defaults_to_80() {
        let endpoint = single_route("foo.* http://foo.backend.com").await;
        assert_eq!(endpoint.address, "foo.backend.com:80");
    }

    #[tokio::test]
    async fn the_description_may_be_overridden() {
        let endpoint =
            single_route("foo.* https://foo.backend.com:1234 This is the description!").await;
        assert_eq!(endpoint.description, "This is the description!");
    }

    #[tokio::test]
    async fn allows_multiple_routes() {
        let locator = routes_from_env(vars(&[
            ("ROUTE_FOO", "foo.* https://foo.backend.com:1234"),
            ("ROUTE_BAR", "bar.* https://bar.backend.com:1234"),
        ]))
        .unwrap();

        let foo = locator
            .locate(&ServerName::parse("foo.com").unwrap())
            .await;
        assert_eq!(foo.endpoint.unwrap().address, "foo.backend.com:1234");

        let bar = locator
            .locate(&ServerName::parse("bar.com").unwrap())
            .await;
        assert_eq!(bar.endpoint.unwrap().address, "bar.backend.com:1234");
    }

    #[test]
    fn ignores_other_environment_variables() {
        let locator = routes_from_env(vars(&[("PATH", "/usr/local/bin")])).unwrap();
        assert!(locator.is_empty());
    }

    #[test]
    fn rejects_invalid_patterns() {
        assert!(routes_from_env(vars(&[("ROUTE_FOO", "/ https://backend")])).is_err());
    }

    #[test]
    fn rejects_unparseable_urls() {
        assert!(routes_from_env(vars(&[("ROUTE_FOO", "www ://backend")])).is_err());
    }
}
