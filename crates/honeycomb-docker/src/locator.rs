use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use honeycomb_backend::{Location, Locator};
use honeycomb_name::ServerName;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{ServiceInfo, ServiceLoader};

/// Default interval between polls of the service list.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Finds backends by scanning a periodically refreshed snapshot of the
/// swarm's routable services.
///
/// The snapshot is replaced atomically; `locate` always observes either the
/// pre-poll or the post-poll list. The polling task knows nothing about the
/// locate cache: when a poll changes the snapshot it bumps a shared route
/// generation counter, strictly after the new snapshot is published, and
/// the cache watching that counter drops its entries on its next locate. No
/// request can keep serving a cached route against a stale list.
pub struct DockerLocator {
    loader: Arc<dyn ServiceLoader>,
    poll_interval: Duration,
    services: ArcSwap<Vec<ServiceInfo>>,
    generation: Option<Arc<AtomicU64>>,
}

impl DockerLocator {
    pub fn new(loader: Arc<dyn ServiceLoader>) -> Self {
        DockerLocator {
            loader,
            poll_interval: DEFAULT_POLL_INTERVAL,
            services: ArcSwap::from_pointee(Vec::new()),
            generation: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        if poll_interval > Duration::ZERO {
            self.poll_interval = poll_interval;
        }
        self
    }

    /// Bump the given route generation counter whenever the service list
    /// changes.
    pub fn with_invalidation(mut self, generation: Arc<AtomicU64>) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Poll the service list until the shutdown signal flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut current: Vec<ServiceInfo> = Vec::new();

        loop {
            self.poll(&mut current).await;

            let interrupted = tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => None,
                changed = shutdown.changed() => Some(changed),
            };

            match interrupted {
                None => {}
                Some(Err(_)) => return,
                Some(Ok(())) => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Run a single poll cycle; exposed for tests.
    pub async fn poll(&self, current: &mut Vec<ServiceInfo>) {
        match self.loader.load().await {
            Ok(new) => {
                self.services.store(Arc::new(new.clone()));
                if log_changes(current, &new) {
                    // Publish-then-bump: anyone who observes the new
                    // generation also observes the new snapshot.
                    if let Some(generation) = &self.generation {
                        generation.fetch_add(1, Ordering::Release);
                    }
                }
                *current = new;
            }
            Err(error) => {
                // Keep serving from the previous snapshot.
                warn!(%error, "service poll failed");
            }
        }
    }
}

#[async_trait]
impl Locator for DockerLocator {
    async fn locate(&self, server_name: &ServerName) -> Location {
        let services = self.services.load();
        let mut best = Location::NONE;

        for info in services.iter() {
            let score = info.matcher.score(server_name);
            if score > best.score {
                best = Location {
                    endpoint: Some(info.endpoint.clone()),
                    score,
                };
            }
        }

        best
    }
}

/// Log added and removed routes, returning true when anything changed.
fn log_changes(old: &[ServiceInfo], new: &[ServiceInfo]) -> bool {
    let mut changed = false;

    for info in old {
        if !new.contains(info) {
            changed = true;
            info!(
                pattern = %info.matcher.pattern(),
                service = %info.name,
                description = %info.endpoint.description,
                "removed route"
            );
        }
    }

    for info in new {
        if !old.contains(info) {
            changed = true;
            info!(
                pattern = %info.matcher.pattern(),
                service = %info.name,
                description = %info.endpoint.description,
                "added route"
            );
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use honeycomb_backend::{CacheLocator, Endpoint, TlsMode};
    use honeycomb_name::Matcher;

    use super::*;
    use crate::DockerError;

    struct ScriptedLoader {
        script: Mutex<Vec<Result<Vec<ServiceInfo>, DockerError>>>,
    }

    impl ScriptedLoader {
        fn new(script: Vec<Result<Vec<ServiceInfo>, DockerError>>) -> Arc<Self> {
            Arc::new(ScriptedLoader {
                script: Mutex::new(script),
            })
        }
    }

    #[async_trait]
    impl ServiceLoader for ScriptedLoader {
        async fn load(&self) -> Result<Vec<ServiceInfo>, DockerError> {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok(Vec::new())
            } else {
                script.remove(0)
            }
        }
    }

    fn info(pattern: &str, address: &str) -> ServiceInfo {
        ServiceInfo {
            name: "web".to_string(),
            matcher: Matcher::new(pattern).unwrap(),
            endpoint: Endpoint {
                description: "example/web:1.0".to_string(),
                address: address.to_string(),
                tls_mode: TlsMode::Disabled,
            },
        }
    }

    fn name(raw: &str) -> ServerName {
        ServerName::parse(raw).unwrap()
    }

    /// Wire a locator and cache the way the server does: a shared route
    /// generation counter, bumped by the poller and watched by the cache.
    fn wire(loader: Arc<dyn ServiceLoader>) -> (Arc<DockerLocator>, Arc<CacheLocator>) {
        let generation = Arc::new(AtomicU64::new(0));
        let locator =
            Arc::new(DockerLocator::new(loader).with_invalidation(generation.clone()));
        let cache = Arc::new(
            CacheLocator::new(locator.clone() as Arc<dyn Locator>).with_generation(generation),
        );
        (locator, cache)
    }

    #[tokio::test]
    async fn locates_services_from_the_snapshot() {
        let loader = ScriptedLoader::new(vec![Ok(vec![info("foo", "web:8080")])]);
        let (locator, _) = wire(loader);

        let mut current = Vec::new();
        locator.poll(&mut current).await;

        let location = locator.locate(&name("foo")).await;
        assert_eq!(location.endpoint.unwrap().address, "web:8080");
    }

    #[tokio::test]
    async fn the_best_scoring_service_wins() {
        let loader = ScriptedLoader::new(vec![Ok(vec![
            info("*.example.*", "outer:8080"),
            info("*.prefix.example.*", "inner:8080"),
        ])]);
        let (locator, _) = wire(loader);

        let mut current = Vec::new();
        locator.poll(&mut current).await;

        let location = locator.locate(&name("w.prefix.example.x")).await;
        assert_eq!(location.endpoint.unwrap().address, "inner:8080");
    }

    #[tokio::test]
    async fn a_failed_poll_retains_the_previous_snapshot() {
        let loader = ScriptedLoader::new(vec![
            Ok(vec![info("foo", "web:8080")]),
            Err(DockerError::UnsupportedHost("boom".to_string())),
        ]);
        let (locator, _) = wire(loader);

        let mut current = Vec::new();
        locator.poll(&mut current).await;
        locator.poll(&mut current).await;

        let location = locator.locate(&name("foo")).await;
        assert_eq!(location.endpoint.unwrap().address, "web:8080");
    }

    #[tokio::test]
    async fn a_changed_snapshot_invalidates_the_cache() {
        let loader = ScriptedLoader::new(vec![
            Ok(vec![info("foo", "web-x:8080")]),
            Ok(vec![info("foo", "web-y:8080")]),
        ]);
        let (locator, cache) = wire(loader);

        let mut current = Vec::new();
        locator.poll(&mut current).await;

        // Prime the cache with the first snapshot.
        let location = cache.locate(&name("foo")).await;
        assert_eq!(location.endpoint.unwrap().address, "web-x:8080");

        // The second poll resolves the same name to a different backend; the
        // generation bump must flush the cached route.
        locator.poll(&mut current).await;

        let location = cache.locate(&name("foo")).await;
        assert_eq!(location.endpoint.unwrap().address, "web-y:8080");
    }

    #[tokio::test]
    async fn an_unchanged_snapshot_leaves_the_cache_alone() {
        let routes = vec![info("foo", "web:8080")];
        let loader = ScriptedLoader::new(vec![Ok(routes.clone()), Ok(routes)]);

        let generation = Arc::new(AtomicU64::new(0));
        let locator =
            Arc::new(DockerLocator::new(loader).with_invalidation(generation.clone()));

        let mut current = Vec::new();
        locator.poll(&mut current).await;
        let after_first = generation.load(Ordering::Acquire);

        locator.poll(&mut current).await;
        assert_eq!(generation.load(Ordering::Acquire), after_first);
    }

    #[test]
    fn change_detection_is_field_wise() {
        let a = vec![info("foo", "web:8080")];
        let b = vec![info("foo", "web:8080")];
        assert!(!log_changes(&a, &b));

        let c = vec![info("foo", "web:9090")];
        assert!(log_changes(&a, &c));

        let d = vec![info("bar", "web:8080")];
        assert!(log_changes(&a, &d));

        assert!(log_changes(&a, &[]));
        assert!(log_changes(&[], &a));
    }
}
