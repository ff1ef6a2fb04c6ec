//! Process-wide owner of the registry, the pools and the reclamation task.

use crate::config::{DatabaseSettings, PoolTimings};
use crate::db::context::DatabaseContext;
use crate::db::driver::Connector;
use crate::db::kvs::KvsPool;
use crate::db::pool::ConnectionPool;
use crate::db::registry::ConnectionRegistry;
use crate::error::{DbError, DbResult};
use crate::models::{PoolStats, WorkerId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct DatabaseManager {
    registry: Arc<ConnectionRegistry>,
    /// Indexed by logical database id.
    pools: Vec<Arc<ConnectionPool>>,
    kvs: Option<Arc<KvsPool>>,
    timings: PoolTimings,
    next_worker: AtomicU64,
    reclaim_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DatabaseManager {
    /// Create one pool per logical database. `settings[i].id` must equal `i`.
    pub fn new(
        settings: Vec<DatabaseSettings>,
        timings: PoolTimings,
        connector: Arc<dyn Connector>,
        kvs: Option<Arc<KvsPool>>,
    ) -> DbResult<Arc<Self>> {
        timings.validate().map_err(DbError::configuration)?;

        let registry = Arc::new(ConnectionRegistry::new());
        let mut pools = Vec::with_capacity(settings.len());
        for (position, db) in settings.into_iter().enumerate() {
            if db.id != position {
                return Err(DbError::configuration(format!(
                    "Database at position {} has id {}",
                    position, db.id
                )));
            }
            pools.push(Arc::new(ConnectionPool::new(
                db,
                timings,
                Arc::clone(&registry),
                Arc::clone(&connector),
            )));
        }

        info!(
            databases = pools.len(),
            registered = registry.len(),
            kvs = kvs.is_some(),
            "Database manager initialized"
        );

        Ok(Arc::new(Self {
            registry,
            pools,
            kvs,
            timings,
            next_worker: AtomicU64::new(1),
            reclaim_handle: Mutex::new(None),
        }))
    }

    /// Open a context for a new unit of work with a fresh worker id.
    pub fn context(self: &Arc<Self>) -> DatabaseContext {
        DatabaseContext::new(Arc::clone(self), self.next_worker_id())
    }

    /// Open a context for a caller-chosen worker id.
    pub fn context_for(self: &Arc<Self>, worker: WorkerId) -> DatabaseContext {
        DatabaseContext::new(Arc::clone(self), worker)
    }

    fn next_worker_id(&self) -> WorkerId {
        loop {
            let id = self.next_worker.fetch_add(1, Ordering::Relaxed);
            if let Some(worker) = WorkerId::new(id) {
                return worker;
            }
        }
    }

    /// Pool of one logical database.
    pub fn pool(&self, database_id: usize) -> DbResult<Arc<ConnectionPool>> {
        self.pools
            .get(database_id)
            .cloned()
            .ok_or_else(|| DbError::invalid_database_id(database_id, self.pools.len()))
    }

    pub fn database_count(&self) -> usize {
        self.pools.len()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn kvs_pool(&self) -> Option<Arc<KvsPool>> {
        self.kvs.clone()
    }

    pub fn timings(&self) -> &PoolTimings {
        &self.timings
    }

    /// Whether upsert statements should be generated for a database.
    pub fn is_upsert_supported(&self, database_id: usize) -> DbResult<bool> {
        Ok(self.pool(database_id)?.settings().is_upsert_supported())
    }

    /// Run one reclamation pass over every pool as of now.
    pub async fn reclaim_idle(&self) -> usize {
        self.reclaim_idle_at(Instant::now()).await
    }

    pub async fn reclaim_idle_at(&self, now: Instant) -> usize {
        let mut closed = 0;
        for pool in &self.pools {
            closed += pool.reclaim_idle_at(now).await;
        }
        closed
    }

    /// Spawn the periodic reclamation task. Calling it twice replaces the first task.
    pub fn start_reclaimer(self: &Arc<Self>) {
        let weak_manager = Arc::downgrade(self);
        let interval = self.timings.reclaim_interval;
        let handle = tokio::spawn(async move {
            Self::reclaim_task(weak_manager, interval).await;
        });

        if let Some(previous) = self.reclaim_handle.lock().replace(handle) {
            previous.abort();
        }
        info!(interval_secs = interval.as_secs(), "Reclamation task started");
    }

    /// Uses a Weak reference so the task exits once the manager is dropped.
    async fn reclaim_task(weak_manager: Weak<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;

            let Some(manager) = weak_manager.upgrade() else {
                info!("Database manager dropped, reclamation task exiting");
                return;
            };

            let closed = manager.reclaim_idle().await;
            debug!(closed, "Reclamation tick");

            // Drop strong reference before sleeping to allow manager deallocation
            drop(manager);
        }
    }

    /// Stop reclamation and close every connection. Contexts still holding
    /// connections see their next operation fail.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.reclaim_handle.lock().take() {
            handle.abort();
        }

        futures_util::future::join_all(self.pools.iter().map(|pool| pool.shutdown())).await;
        if let Some(kvs) = &self.kvs {
            kvs.close_all().await;
        }

        if !self.registry.is_empty() {
            warn!(
                remaining = self.registry.len(),
                "Connections still registered at shutdown, closing"
            );
            self.registry.close_all().await;
        }
        info!("Database manager shut down");
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools.iter().map(|pool| pool.stats()).collect()
    }
}

impl std::fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("databases", &self.pools.len())
            .field("registry", &self.registry)
            .field("timings", &self.timings)
            .finish()
    }
}

impl Drop for DatabaseManager {
    fn drop(&mut self) {
        if let Some(handle) = self.reclaim_handle.lock().take() {
            handle.abort();
        }
    }
}
