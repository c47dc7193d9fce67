use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use honeycomb_name::ServerName;
use tokio::sync::RwLock;

use crate::{Location, Locator};

/// A locator that caches the results of another locator.
///
/// Negative results are cached too. Reads take a shared lock; a miss queries
/// the delegate outside any lock and then installs the result under an
/// exclusive lock, so concurrent misses for the same name may each query the
/// delegate and the last writer wins.
///
/// Invalidation is decoupled from whoever maintains the routes: the cache
/// can watch a shared generation counter (see [`with_generation`]) and drops
/// every entry when the counter moves. The Docker locator bumps the counter
/// after publishing a changed service snapshot, so a locate that observes
/// the bump always re-queries against the new snapshot. [`clear`] remains
/// available for dropping the entries directly.
///
/// [`with_generation`]: CacheLocator::with_generation
/// [`clear`]: CacheLocator::clear
pub struct CacheLocator {
    next: Arc<dyn Locator>,
    entries: RwLock<HashMap<ServerName, Location>>,
    generation: Option<Arc<AtomicU64>>,
    seen: AtomicU64,
}

impl CacheLocator {
    pub fn new(next: Arc<dyn Locator>) -> Self {
        CacheLocator {
            next,
            entries: RwLock::new(HashMap::new()),
            generation: None,
            seen: AtomicU64::new(0),
        }
    }

    /// Watch a shared generation counter: whenever it has moved since the
    /// last locate, the cache empties itself before serving.
    pub fn with_generation(mut self, generation: Arc<AtomicU64>) -> Self {
        self.seen = AtomicU64::new(generation.load(Ordering::Acquire));
        self.generation = Some(generation);
        self
    }

    /// Drop every cached entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Drop the entries when the watched generation counter has moved.
    async fn sync_generation(&self) {
        let Some(generation) = &self.generation else {
            return;
        };

        let current = generation.load(Ordering::Acquire);
        if self.seen.load(Ordering::Acquire) == current {
            return;
        }

        let mut entries = self.entries.write().await;
        // Another task may have caught up while we waited for the lock.
        if self.seen.load(Ordering::Acquire) != current {
            entries.clear();
            self.seen.store(current, Ordering::Release);
        }
    }
}

#[async_trait]
impl Locator for CacheLocator {
    async fn locate(&self, server_name: &ServerName) -> Location {
        self.sync_generation().await;

        {
            let entries = self.entries.read().await;
            if let Some(location) = entries.get(server_name) {
                return location.clone();
            }
        }

        let location = self.next.locate(server_name).await;

        let mut entries = self.entries.write().await;
        entries.insert(server_name.clone(), location.clone());

        location
    }
}
