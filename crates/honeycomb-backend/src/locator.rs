use async_trait::async_trait;
use honeycomb_name::ServerName;

use crate::Endpoint;

/// The outcome of a locate call.
///
/// A score of zero or less means no match was made, in which case there is no
/// endpoint. A positive score may be paired with no endpoint, meaning the
/// name is recognized but must not be routed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub endpoint: Option<Endpoint>,
    pub score: i32,
}

impl Location {
    pub const NONE: Location = Location {
        endpoint: None,
        score: 0,
    };

    /// True when the server name matched something, routable or not.
    pub fn is_recognized(&self) -> bool {
        self.score > 0
    }
}

/// Finds a back-end HTTP server for the server name of a request.
#[async_trait]
pub trait Locator: Send + Sync {
    /// Find the backend for the given server name.
    async fn locate(&self, server_name: &ServerName) -> Location;
}

/// Combines multiple locators, keeping the best-scoring match.
///
/// Ties resolve to the earliest child.
#[derive(Default)]
pub struct AggregateLocator {
    children: Vec<std::sync::Arc<dyn Locator>>,
}

impl AggregateLocator {
    pub fn new(children: Vec<std::sync::Arc<dyn Locator>>) -> Self {
        AggregateLocator { children }
    }
}

#[async_trait]
impl Locator for AggregateLocator {
    async fn locate(&self, server_name: &ServerName) -> Location {
        let mut best = Location::NONE;

        for child in &self.children {
            let candidate = child.locate(server_name).await;
            if candidate.score > best.score {
                best = candidate;
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{StaticLocator, TlsMode};

    fn endpoint(address: &str) -> Endpoint {
        Endpoint {
            description: "test".to_string(),
            address: address.to_string(),
            tls_mode: TlsMode::Disabled,
        }
    }

    fn name(raw: &str) -> ServerName {
        ServerName::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn locates_endpoints_from_the_inner_locators() {
        let first = StaticLocator::new()
            .with("foo", Some(endpoint("static1-foo:443")))
            .unwrap();
        let second = StaticLocator::new()
            .with("foo", Some(endpoint("static2-foo:443")))
            .unwrap()
            .with("bar", Some(endpoint("static2-bar:443")))
            .unwrap();

        let subject = AggregateLocator::new(vec![Arc::new(first), Arc::new(second)]);

        let location = subject.locate(&name("bar")).await;
        assert_eq!(location.endpoint.unwrap().address, "static2-bar:443");
    }

    #[tokio::test]
    async fn ties_resolve_to_the_earliest_child() {
        let first = StaticLocator::new()
            .with("foo", Some(endpoint("static1-foo:443")))
            .unwrap();
        let second = StaticLocator::new()
            .with("foo", Some(endpoint("static2-foo:443")))
            .unwrap();

        let subject = AggregateLocator::new(vec![Arc::new(first), Arc::new(second)]);

        let location = subject.locate(&name("foo")).await;
        assert_eq!(location.endpoint.unwrap().address, "static1-foo:443");
    }

    #[tokio::test]
    async fn the_best_score_wins_across_children() {
        let first = StaticLocator::new()
            .with("*.example.*", Some(endpoint("wild:443")))
            .unwrap();
        let second = StaticLocator::new()
            .with("www.example.com", Some(endpoint("exact:443")))
            .unwrap();

        let subject = AggregateLocator::new(vec![Arc::new(first), Arc::new(second)]);

        let location = subject.locate(&name("www.example.com")).await;
        assert_eq!(location.endpoint.unwrap().address, "exact:443");
    }

    #[tokio::test]
    async fn returns_no_endpoint_when_nothing_matches() {
        let subject = AggregateLocator::new(vec![]);
        let location = subject.locate(&name("unknown")).await;
        assert_eq!(location, Location::NONE);
    }
}
