use async_trait::async_trait;
use honeycomb_name::{Matcher, PatternError, ServerName};

use crate::{Endpoint, Location, Locator};

/// An ordered list of pattern-to-endpoint routes.
///
/// The entry with the strictly greatest score wins; ties resolve to the
/// earliest inserted entry. An entry may map a pattern to no endpoint,
/// marking the name as recognized but unroutable.
#[derive(Default)]
pub struct StaticLocator {
    entries: Vec<(Matcher, Option<Endpoint>)>,
}

impl StaticLocator {
    pub fn new() -> Self {
        StaticLocator::default()
    }

    /// Append a route, consuming and returning the locator.
    pub fn with(mut self, pattern: &str, endpoint: Option<Endpoint>) -> Result<Self, PatternError> {
        self.push(pattern, endpoint)?;
        Ok(self)
    }

    /// Append a route.
    pub fn push(&mut self, pattern: &str, endpoint: Option<Endpoint>) -> Result<(), PatternError> {
        let matcher = Matcher::new(pattern)?;
        self.entries.push((matcher, endpoint));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over the configured routes.
    pub fn routes(&self) -> impl Iterator<Item = (&Matcher, Option<&Endpoint>)> {
        self.entries
            .iter()
            .map(|(matcher, endpoint)| (matcher, endpoint.as_ref()))
    }
}

#[async_trait]
impl Locator for StaticLocator {
    async fn locate(&self, server_name: &ServerName) -> Location {
        let mut best = Location::NONE;

        for (matcher, endpoint) in &self.entries {
            let score = matcher.score(server_name);
            if score > best.score {
                best = Location {
                    endpoint: endpoint.clone(),
                    score,
                };
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TlsMode;

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

    fn subject() -> StaticLocator {
        StaticLocator::new()
            .with("foo", Some(endpoint("foo:443")))
            .unwrap()
            .with("bar", Some(endpoint("bar1:443")))
            .unwrap()
            .with("bar", Some(endpoint("bar2:443")))
            .unwrap()
    }

    #[tokio::test]
    async fn matches_endpoints() {
        let location = subject().locate(&name("foo")).await;
        assert_eq!(location.endpoint.unwrap().address, "foo:443");
        assert!(location.score > 0);
    }

    #[tokio::test]
    async fn matches_endpoints_in_insertion_order() {
        let location = subject().locate(&name("bar")).await;
        assert_eq!(location.endpoint.unwrap().address, "bar1:443");
        assert!(location.score > 0);
    }

    #[tokio::test]
    async fn returns_nothing_when_no_entry_matches() {
        let location = subject().locate(&name("unknown")).await;
        assert!(location.endpoint.is_none());
        assert!(location.score <= 0);
    }

    #[tokio::test]
    async fn the_highest_scoring_entry_wins() {
        let locator = StaticLocator::new()
            .with("*.example.*", Some(endpoint("static1:443")))
            .unwrap()
            .with("*.prefix.example.*", Some(endpoint("static2:443")))
            .unwrap();

        let location = locator.locate(&name("w.prefix.example.x")).await;
        assert_eq!(location.endpoint.unwrap().address, "static2:443");
    }

    #[tokio::test]
    async fn an_exact_match_beats_a_wildcard() {
        let locator = StaticLocator::new()
            .with("*.example.*", Some(endpoint("wild:443")))
            .unwrap()
            .with("w.prefix.example.x", Some(endpoint("exact:443")))
            .unwrap();

        let location = locator.locate(&name("w.prefix.example.x")).await;
        assert_eq!(location.endpoint.unwrap().address, "exact:443");
    }

    #[tokio::test]
    async fn allows_mapping_to_no_endpoint() {
        let locator = StaticLocator::new()
            .with("nomatch", None)
            .unwrap()
            .with("*", Some(endpoint("catch-all:443")))
            .unwrap();

        let location = locator.locate(&name("nomatch")).await;
        assert!(location.endpoint.is_none());
        assert!(location.score > 0);
    }

    #[test]
    fn rejects_invalid_patterns() {
        assert!(StaticLocator::new().with("", None).is_err());
    }
}
