//! Currency cache
//!
//! Read-through cache in front of the metadata store. Entries expire after a
//! fixed TTL; misses are not cached. Writers evict synchronously so a
//! deactivated currency is never served from cache after the admin call
//! returns.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::{metrics::CACHE_REQUESTS_TOTAL, store::MetadataStore, types::Currency, Result};

/// Map whose entries expire `ttl` after insertion
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, (V, Instant)>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    /// Empty cache
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Live value for `key`
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|(_, expires)| Instant::now() < *expires)
            .map(|(value, _)| value.clone())
    }

    /// Insert or refresh
    pub fn insert(&self, key: K, value: V) {
        let expires = Instant::now() + self.ttl;
        let mut entries = self.entries.write();
        entries.retain(|_, (_, at)| Instant::now() < *at);
        entries.insert(key, (value, expires));
    }

    /// Evict one key
    pub fn remove(&self, key: &K) {
        self.entries.write().remove(key);
    }

    /// Evict everything
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// Shared currency metadata cache
pub struct CurrencyCache {
    store: Arc<dyn MetadataStore>,
    entries: TtlCache<u32, Currency>,
}

impl std::fmt::Debug for CurrencyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurrencyCache")
            .field("ttl", &self.entries.ttl)
            .finish()
    }
}

impl CurrencyCache {
    /// Cache in front of `store`
    pub fn new(store: Arc<dyn MetadataStore>, ttl: Duration) -> Self {
        Self {
            store,
            entries: TtlCache::new(ttl),
        }
    }

    /// Currency by id, loading it from the store on a miss
    pub async fn get(&self, id: u32) -> Result<Option<Currency>> {
        if let Some(currency) = self.entries.get(&id) {
            CACHE_REQUESTS_TOTAL.with_label_values(&["hit"]).inc();
            return Ok(Some(currency));
        }
        CACHE_REQUESTS_TOTAL.with_label_values(&["miss"]).inc();

        let loaded = self.store.get_currency(id).await?;
        if let Some(currency) = &loaded {
            self.entries.insert(id, currency.clone());
        }
        Ok(loaded)
    }

    /// Drop one currency
    pub fn invalidate(&self, id: u32) {
        debug!("Evicting currency {} from cache", id);
        self.entries.remove(&id);
    }

    /// Drop everything
    pub fn clear(&self) {
        self.entries.clear();
    }
}
