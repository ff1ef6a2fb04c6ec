//! Bounded most-recently-used set of tenant connections for one logical database.
//!
//! Entries are connection names; the connections themselves live in the
//! [`ConnectionRegistry`]. Inserting beyond the bound evicts the least recently used
//! entry, which is retired from the registry (closed now, or on release when owned).

use crate::db::registry::ConnectionRegistry;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub struct TenantCache {
    database_id: usize,
    registry: Arc<ConnectionRegistry>,
    /// Connection name to last use.
    lru: Mutex<LruCache<String, Instant>>,
}

impl TenantCache {
    pub fn new(database_id: usize, max_size: usize, registry: Arc<ConnectionRegistry>) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            database_id,
            registry,
            lru: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Insert or refresh `name` as most recently used at `now`.
    ///
    /// Returns the evicted name, if the bound was exceeded. The evicted connection has
    /// already been retired when this returns.
    pub async fn cache(&self, name: &str, now: Instant) -> Option<String> {
        let evicted = {
            let mut lru = self.lru.lock();
            match lru.get_mut(name) {
                Some(last) => {
                    *last = now;
                    None
                }
                None => lru.push(name.to_string(), now).map(|(victim, _)| victim),
            }
        };

        if let Some(victim) = &evicted {
            info!(
                database_id = self.database_id,
                connection = %victim,
                "Evicting least recently used tenant connection"
            );
            self.registry.retire(victim).await;
        }
        evicted
    }

    /// Refresh the last-used time of a resident entry without reordering.
    pub fn touch(&self, name: &str, now: Instant) -> bool {
        match self.lru.lock().peek_mut(name) {
            Some(last) => {
                *last = now;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lru.lock().contains(name)
    }

    /// Drop an entry and retire its connection.
    pub async fn remove(&self, name: &str) -> bool {
        let removed = self.lru.lock().pop(name).is_some();
        if removed {
            self.registry.retire(name).await;
        }
        removed
    }

    /// Retire every entry idle for longer than `timeout` at `now`.
    pub async fn expire(&self, now: Instant, timeout: Duration) -> Vec<String> {
        let expired: Vec<String> = {
            let mut lru = self.lru.lock();
            let expired: Vec<String> = lru
                .iter()
                .filter(|(_, last)| now.saturating_duration_since(**last) > timeout)
                .map(|(name, _)| name.clone())
                .collect();
            for name in &expired {
                lru.pop(name);
            }
            expired
        };

        for name in &expired {
            debug!(
                database_id = self.database_id,
                connection = %name,
                "Closing idle tenant connection"
            );
            self.registry.retire(name).await;
        }
        expired
    }

    /// Retire every entry.
    pub async fn clear(&self) {
        let names: Vec<String> = {
            let mut lru = self.lru.lock();
            let names = lru.iter().map(|(name, _)| name.clone()).collect();
            lru.clear();
            names
        };
        for name in &names {
            self.registry.retire(name).await;
        }
    }

    pub fn len(&self) -> usize {
        self.lru.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident names, most recently used first.
    pub fn names(&self) -> Vec<String> {
        self.lru.lock().iter().map(|(name, _)| name.clone()).collect()
    }
}

impl std::fmt::Debug for TenantCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let max_size = self.lru.lock().cap();
        f.debug_struct("TenantCache")
            .field("database_id", &self.database_id)
            .field("max_size", &max_size)
            .field("names", &self.names())
            .finish()
    }
}
