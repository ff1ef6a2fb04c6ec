//! Per-logical-database connection pool.
//!
//! A pool owns a fixed set of pooled connection names (`rdb{id}_{slot}`) split into two
//! stacks: `available` names are cold (never opened, or closed by reclamation) and
//! `cached` names are warm (open and idle, stamped with their last use). Tenant
//! connections (`udb{id}_{tenant}`) are created on demand and kept in a bounded
//! [`TenantCache`].
//!
//! # Design Decisions
//!
//! - **Names, not handles, in the stacks**: the [`ConnectionRegistry`] owns every
//!   connection; a name is in at most one of `available`/`cached`, or handed out
//! - **Warm first**: acquisition pops `cached` before `available` to avoid opening
//! - **`parking_lot::Mutex` for the stacks**: bookkeeping only, never held across await
//! - **Tenant connections are claimed on acquisition**: eviction or expiry of a claimed
//!   connection only retires it, and the owner's release closes it
//! - **Bounded exhaustion wait**: when both stacks are empty the caller waits on a
//!   [`Notify`] for `acquire_retries` x `acquire_backoff`, then gets
//!   [`DbError::PoolExhausted`]
//!
//! # Reclamation
//!
//! [`ConnectionPool::reclaim_idle_at`] closes cached connections idle longer than
//! `cached_idle_timeout` (returning their names to `available`) and expires tenant
//! connections idle longer than `tenant_idle_timeout`. It takes the same locks as
//! acquisition, so it never sees a half-moved name.

use crate::config::{DatabaseSettings, PoolTimings};
use crate::db::driver::Connector;
use crate::db::registry::{ConnectionRegistry, PhysicalConnection, release_connection};
use crate::db::tenant_cache::TenantCache;
use crate::error::{DbError, DbResult};
use crate::models::{
    PoolStats, WorkerId, pooled_connection_name, tenant_connection_name, validate_tenant,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Claim attempts for a tenant name whose connection is replaced meanwhile.
const TENANT_CLAIM_ATTEMPTS: u32 = 3;

#[derive(Debug, Default)]
struct Slots {
    available: Vec<String>,
    cached: Vec<(String, Instant)>,
}

enum Slot {
    Warm(String),
    Cold(String),
}

pub struct ConnectionPool {
    settings: DatabaseSettings,
    timings: PoolTimings,
    registry: Arc<ConnectionRegistry>,
    connector: Arc<dyn Connector>,
    tenants: TenantCache,
    slots: Mutex<Slots>,
    returned: Notify,
}

impl ConnectionPool {
    /// Create the pool and register its pooled names. No connection is opened yet.
    pub fn new(
        settings: DatabaseSettings,
        timings: PoolTimings,
        registry: Arc<ConnectionRegistry>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let mut available = Vec::new();
        if !settings.tenant_only {
            // Reverse so slot 0 is handed out first
            for slot in (0..settings.max_connections).rev() {
                let name = pooled_connection_name(settings.id, slot);
                registry.add(name.clone(), settings.id, settings.db_type, None);
                available.push(name);
            }
        }

        info!(
            database_id = settings.id,
            db_type = %settings.db_type,
            connections = available.len(),
            tenant_only = settings.tenant_only,
            "Connection pool created"
        );

        let tenants = TenantCache::new(settings.id, timings.tenant_cache_size, Arc::clone(&registry));
        Self {
            settings,
            timings,
            registry,
            connector,
            tenants,
            slots: Mutex::new(Slots {
                available,
                cached: Vec::new(),
            }),
            returned: Notify::new(),
        }
    }

    pub fn database_id(&self) -> usize {
        self.settings.id
    }

    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    pub fn timings(&self) -> &PoolTimings {
        &self.timings
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Hand out a connection: the tenant's own connection when `tenant` is given,
    /// otherwise a pooled one.
    ///
    /// A tenant connection comes back already claimed by `worker`. A pooled name is
    /// exclusive while it is out of the stacks and is claimed on `begin`.
    pub async fn acquire(
        &self,
        tenant: Option<&str>,
        worker: WorkerId,
    ) -> DbResult<Arc<PhysicalConnection>> {
        match tenant {
            Some(tenant) => self.acquire_tenant(tenant, worker).await,
            None => self.acquire_pooled().await,
        }
    }

    async fn acquire_pooled(&self) -> DbResult<Arc<PhysicalConnection>> {
        if self.settings.tenant_only {
            return Err(DbError::invalid_input(format!(
                "Database {} only serves tenant connections",
                self.settings.id
            )));
        }

        let mut waits = 0;
        loop {
            let slot = self.take_slot();
            match slot {
                Some(Slot::Warm(name)) => {
                    let conn = self.lookup(&name)?;
                    if conn.is_open() {
                        debug!(connection = %name, "Reusing cached connection");
                        return Ok(conn);
                    }
                    // Lost its session while idle; open it as a cold name
                    error!(connection = %name, "Cached connection is not open");
                    self.slots.lock().available.push(name);
                }
                Some(Slot::Cold(name)) => {
                    let conn = self.lookup(&name)?;
                    if conn.is_open() {
                        warn!(connection = %name, "Available connection is already open");
                        return Ok(conn);
                    }
                    match conn.open(self.connector.as_ref(), &self.settings).await {
                        Ok(()) => return Ok(conn),
                        Err(e) => {
                            error!(connection = %name, error = %e, "Failed to open connection");
                            self.slots.lock().available.push(name);
                            self.returned.notify_waiters();
                            return Err(e);
                        }
                    }
                }
                None => {
                    waits += 1;
                    if waits > self.timings.acquire_retries {
                        warn!(
                            database_id = self.settings.id,
                            waited_ms = self.timings.max_wait().as_millis() as u64,
                            "Connection pool exhausted"
                        );
                        return Err(DbError::pool_exhausted(self.settings.id));
                    }
                    debug!(database_id = self.settings.id, wait = waits, "Pool empty, waiting");
                    let _ = tokio::time::timeout(
                        self.timings.acquire_backoff,
                        self.returned.notified(),
                    )
                    .await;
                }
            }
        }
    }

    fn take_slot(&self) -> Option<Slot> {
        let mut slots = self.slots.lock();
        if let Some((name, _)) = slots.cached.pop() {
            return Some(Slot::Warm(name));
        }
        slots.available.pop().map(Slot::Cold)
    }

    fn lookup(&self, name: &str) -> DbResult<Arc<PhysicalConnection>> {
        self.registry
            .lookup(name)
            .ok_or_else(|| DbError::internal(format!("Pooled connection {} is not registered", name)))
    }

    async fn acquire_tenant(
        &self,
        tenant: &str,
        worker: WorkerId,
    ) -> DbResult<Arc<PhysicalConnection>> {
        validate_tenant(tenant).map_err(DbError::invalid_input)?;
        let name = tenant_connection_name(self.settings.id, tenant);

        for attempt in 1..=TENANT_CLAIM_ATTEMPTS {
            let conn = self
                .registry
                .get_or_add(&name, self.settings.id, self.settings.db_type, Some(tenant));
            if let Err(e) = conn
                .claim(worker, self.timings.acquire_retries, self.timings.acquire_backoff)
                .await
            {
                if conn.is_retired() {
                    debug!(connection = %name, attempt, "Tenant connection retired while waiting");
                    continue;
                }
                return Err(e);
            }

            // Evicted or expired while this worker waited for it
            if !self.is_registered(&conn) {
                debug!(connection = %name, attempt, "Tenant connection replaced while claiming");
                release_connection(&conn, worker).await?;
                continue;
            }

            if !conn.is_open() {
                if let Err(e) = conn.open(self.connector.as_ref(), &self.settings).await {
                    error!(connection = %name, error = %e, "Failed to open tenant connection");
                    if !self.tenants.contains(&name) {
                        self.registry.remove(&name);
                    }
                    release_connection(&conn, worker).await?;
                    return Err(e);
                }
            }

            self.tenants.cache(&name, Instant::now()).await;
            return Ok(conn);
        }

        Err(DbError::internal(format!(
            "Tenant connection {} was replaced {} times while claiming",
            name, TENANT_CLAIM_ATTEMPTS
        )))
    }

    /// Whether `conn` is still the registered connection for its name.
    fn is_registered(&self, conn: &Arc<PhysicalConnection>) -> bool {
        self.registry
            .lookup(conn.name())
            .is_some_and(|current| Arc::ptr_eq(&current, conn))
    }

    /// Return a connection claimed by `worker`.
    ///
    /// Pooled: `force` closes it and returns the name to `available`, otherwise the name
    /// goes to `cached` stamped with the current time. Tenant: `force` closes and forgets
    /// it, otherwise only the claim is dropped.
    pub async fn release(
        &self,
        conn: &Arc<PhysicalConnection>,
        worker: WorkerId,
        force: bool,
    ) -> DbResult<()> {
        if conn.tenant().is_some() {
            if !conn.is_owned_by(worker) {
                return release_connection(conn, worker).await;
            }
            // A connection already replaced under its name leaves the cache entry alone
            if self.is_registered(conn) {
                if force || !conn.is_open() {
                    // Retired while still owned, so the release below closes it
                    if !self.tenants.remove(conn.name()).await {
                        self.registry.retire(conn.name()).await;
                    }
                } else {
                    self.tenants.touch(conn.name(), Instant::now());
                }
            }
            return release_connection(conn, worker).await;
        }

        // The name is in neither stack yet, so nobody can take it between these steps
        release_connection(conn, worker).await?;
        if force {
            conn.close().await;
        }
        self.return_name(conn);
        Ok(())
    }

    /// Return a pooled connection that was handed out but never claimed.
    pub fn return_unclaimed(&self, conn: &PhysicalConnection) {
        if conn.tenant().is_none() {
            self.return_name(conn);
        }
    }

    /// Give back a claimed connection without an async runtime. The session is dropped
    /// without a graceful close and a pooled name returns to `available`.
    pub fn abandon(&self, conn: &PhysicalConnection, worker: WorkerId) {
        if !conn.is_owned_by(worker) {
            warn!(
                connection = %conn.name(),
                owner = conn.owner(),
                caller = %worker,
                "Abandoned connection is held by another worker"
            );
            return;
        }
        conn.discard();
        if conn.try_release(worker).is_err() {
            return;
        }
        if conn.tenant().is_none() {
            self.return_name(conn);
        }
        debug!(connection = %conn.name(), "Connection abandoned without a runtime");
    }

    fn return_name(&self, conn: &PhysicalConnection) {
        {
            let mut slots = self.slots.lock();
            if conn.is_open() {
                slots.cached.push((conn.name().to_string(), Instant::now()));
            } else {
                slots.available.push(conn.name().to_string());
            }
        }
        self.returned.notify_waiters();
    }

    /// Close idle connections as of now.
    pub async fn reclaim_idle(&self) -> usize {
        self.reclaim_idle_at(Instant::now()).await
    }

    /// Close cached connections idle longer than `cached_idle_timeout` at `now` and expire
    /// tenant connections idle longer than `tenant_idle_timeout`. Returns how many
    /// connections were closed.
    pub async fn reclaim_idle_at(&self, now: Instant) -> usize {
        let idle: Vec<String> = {
            let mut slots = self.slots.lock();
            let timeout = self.timings.cached_idle_timeout;
            let (idle, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut slots.cached)
                .into_iter()
                .partition(|(_, last)| now.saturating_duration_since(*last) > timeout);
            slots.cached = keep;
            idle.into_iter().map(|(name, _)| name).collect()
        };

        for name in &idle {
            if let Some(conn) = self.registry.lookup(name) {
                conn.close().await;
            }
            debug!(connection = %name, "Closed idle cached connection");
        }
        if !idle.is_empty() {
            self.slots.lock().available.extend(idle.iter().cloned());
            self.returned.notify_waiters();
        }

        let expired = self
            .tenants
            .expire(now, self.timings.tenant_idle_timeout)
            .await;

        let closed = idle.len() + expired.len();
        if closed > 0 {
            info!(
                database_id = self.settings.id,
                cached = idle.len(),
                tenants = expired.len(),
                "Reclaimed idle connections"
            );
        }
        closed
    }

    /// Close every connection of this pool and deregister them.
    pub async fn shutdown(&self) {
        let names: Vec<String> = {
            let mut slots = self.slots.lock();
            let mut names: Vec<String> = slots.cached.drain(..).map(|(n, _)| n).collect();
            names.append(&mut slots.available);
            names
        };
        for name in &names {
            if let Some(conn) = self.registry.remove(name) {
                conn.close().await;
            }
        }
        self.tenants.clear().await;
        info!(database_id = self.settings.id, "Connection pool shut down");
    }

    /// Resident tenant connection names, most recently used first.
    pub fn tenant_names(&self) -> Vec<String> {
        self.tenants.names()
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.slots.lock();
        PoolStats {
            database_id: self.settings.id,
            max_connections: if self.settings.tenant_only {
                0
            } else {
                self.settings.max_connections
            },
            available: slots.available.len(),
            cached: slots.cached.len(),
            tenants: self.tenants.len(),
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("database_id", &self.settings.id)
            .field("db_type", &self.settings.db_type)
            .field("stats", &self.stats())
            .finish()
    }
}
