//! Process-wide registry of physical connections.
//!
//! Every physical connection, pooled or tenant-scoped, is registered here by name
//! together with an owner tag. The registry is the only arbiter of ownership: a worker
//! must claim a connection before running a transaction on it and give it back when done.
//!
//! # Design Decisions
//!
//! - **`AtomicU64` owner tag**: claim and release are single compare-and-swap operations,
//!   so two workers can never both observe success
//! - **`parking_lot::RwLock` for the name map**: lookups and claims take the shared lock,
//!   only registration and removal take the exclusive one
//! - **`tokio::sync::Mutex` per session**: backend I/O serializes on the connection itself,
//!   never on the registry or a pool lock
//!
//! # Concurrency Safety
//!
//! - No registry lock is held across an await point
//! - Bounded waits: a contended claim retries `max_retries` times with `backoff` between
//!   attempts and then fails with [`DbError::ConnectionUnavailable`]
//! - A retired connection (removed while still owned) is closed by the owner's release

use crate::config::DatabaseSettings;
use crate::db::driver::{ConnectTarget, Connector, Session};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, WorkerId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex as SessionMutex, MutexGuard, Notify};
use tracing::{debug, info, warn};

/// Owner tag of a connection nobody holds.
pub const FREE: u64 = 0;

/// Owner tag taken by the registry while it closes a retired connection.
pub const RETIRING: u64 = u64::MAX;

/// One physical connection to a relational backend.
pub struct PhysicalConnection {
    name: String,
    database_id: usize,
    db_type: DatabaseType,
    tenant: Option<String>,
    owner: AtomicU64,
    open: AtomicBool,
    /// Set when the connection left the registry while owned.
    retired: AtomicBool,
    session: SessionMutex<Option<Box<dyn Session>>>,
    released: Notify,
}

impl PhysicalConnection {
    fn new(
        name: String,
        database_id: usize,
        db_type: DatabaseType,
        tenant: Option<String>,
    ) -> Self {
        Self {
            name,
            database_id,
            db_type,
            tenant,
            owner: AtomicU64::new(FREE),
            open: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            session: SessionMutex::new(None),
            released: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database_id(&self) -> usize {
        self.database_id
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// Tenant this connection authenticates as, if any.
    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    /// Current owner tag ([`FREE`] when nobody holds it).
    pub fn owner(&self) -> u64 {
        self.owner.load(Ordering::Acquire)
    }

    pub fn is_owned_by(&self, worker: WorkerId) -> bool {
        self.owner() == worker.get()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Claim the connection for `worker`. Succeeds when free or already held by `worker`.
    /// On contention returns the current holder.
    pub fn try_claim(&self, worker: WorkerId) -> Result<(), u64> {
        let tag = worker.get();
        match self
            .owner
            .compare_exchange(FREE, tag, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(current) if current == tag => Ok(()),
            Err(current) => Err(current),
        }
    }

    /// Give the connection back. A connection nobody holds is left alone; one held by
    /// someone else is refused and the holder is returned.
    pub fn try_release(&self, worker: WorkerId) -> Result<(), u64> {
        match self.owner.compare_exchange(
            worker.get(),
            FREE,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.released.notify_waiters();
                Ok(())
            }
            Err(FREE) => Ok(()),
            Err(current) => Err(current),
        }
    }

    /// Claim the connection for `worker`, waiting for a bounded time.
    ///
    /// Makes up to `max_retries` attempts with `backoff` between them. A connection the
    /// registry is closing fails at once.
    pub async fn claim(&self, worker: WorkerId, max_retries: u32, backoff: Duration) -> DbResult<()> {
        let attempts = max_retries.max(1);
        let mut holder = FREE;

        for attempt in 1..=attempts {
            match self.try_claim(worker) {
                Ok(()) => return Ok(()),
                Err(RETIRING) => {
                    holder = RETIRING;
                    break;
                }
                Err(current) => holder = current,
            }

            if attempt < attempts {
                debug!(
                    connection = %self.name,
                    holder,
                    attempt,
                    "Connection busy, waiting"
                );
                let _ = tokio::time::timeout(backoff, self.released.notified()).await;
            }
        }

        warn!(
            connection = %self.name,
            holder,
            worker = %worker,
            "Connection unavailable after bounded wait"
        );
        Err(DbError::connection_unavailable(self.name.as_str(), holder, attempts))
    }

    /// Lock the backend session for one I/O operation.
    pub async fn session(&self) -> MutexGuard<'_, Option<Box<dyn Session>>> {
        self.session.lock().await
    }

    /// Open the backend session if it is not open yet, then run the post-open statements.
    pub async fn open(&self, connector: &dyn Connector, settings: &DatabaseSettings) -> DbResult<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            self.open.store(true, Ordering::Release);
            return Ok(());
        }

        let target = ConnectTarget {
            settings,
            name: &self.name,
            tenant: self.tenant.as_deref(),
        };
        let mut opened = connector.connect(&target).await?;

        for statement in &settings.post_open_statements {
            if let Err(e) = opened.execute(statement).await {
                warn!(
                    connection = %self.name,
                    statement = %statement,
                    error = %e,
                    "Post-open statement failed"
                );
            }
        }

        *session = Some(opened);
        self.open.store(true, Ordering::Release);
        debug!(connection = %self.name, database_id = self.database_id, "Opened connection");
        Ok(())
    }

    /// Close the backend session. Closing a closed connection is a no-op.
    pub async fn close(&self) {
        let mut session = self.session.lock().await;
        self.open.store(false, Ordering::Release);
        if let Some(s) = session.take() {
            match s.close().await {
                Ok(()) => debug!(connection = %self.name, "Closed connection"),
                Err(e) => warn!(connection = %self.name, error = %e, "Error while closing connection"),
            }
        }
    }

    /// Drop the backend session without a graceful close. Used where no runtime is
    /// available to run [`close`](Self::close).
    pub(crate) fn discard(&self) {
        self.open.store(false, Ordering::Release);
        match self.session.try_lock() {
            Ok(mut session) => drop(session.take()),
            Err(_) => warn!(connection = %self.name, "Session busy, left for the next open"),
        }
    }

    /// Close a retired connection once nobody holds it.
    async fn close_if_retired(&self) {
        if !self.is_retired() {
            return;
        }
        if self
            .owner
            .compare_exchange(FREE, RETIRING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.close().await;
        }
    }
}

impl std::fmt::Debug for PhysicalConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalConnection")
            .field("name", &self.name)
            .field("database_id", &self.database_id)
            .field("db_type", &self.db_type)
            .field("tenant", &self.tenant)
            .field("owner", &self.owner())
            .field("open", &self.is_open())
            .field("retired", &self.is_retired())
            .finish()
    }
}

/// Name-keyed map of every physical connection in the process.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<PhysicalConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any previous entry with the same name.
    pub fn add(
        &self,
        name: impl Into<String>,
        database_id: usize,
        db_type: DatabaseType,
        tenant: Option<String>,
    ) -> Arc<PhysicalConnection> {
        let name = name.into();
        let conn = Arc::new(PhysicalConnection::new(
            name.clone(),
            database_id,
            db_type,
            tenant,
        ));
        if let Some(previous) = self.connections.write().insert(name, Arc::clone(&conn)) {
            warn!(connection = %previous.name, "Replaced registered connection");
        }
        conn
    }

    /// Return the registered connection or register a new one, atomically.
    pub fn get_or_add(
        &self,
        name: &str,
        database_id: usize,
        db_type: DatabaseType,
        tenant: Option<&str>,
    ) -> Arc<PhysicalConnection> {
        let mut connections = self.connections.write();
        let conn = connections.entry(name.to_string()).or_insert_with(|| {
            Arc::new(PhysicalConnection::new(
                name.to_string(),
                database_id,
                db_type,
                tenant.map(String::from),
            ))
        });
        Arc::clone(conn)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<PhysicalConnection>> {
        self.connections.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.read().contains_key(name)
    }

    /// Deregister a connection. The caller decides whether to close it.
    pub fn remove(&self, name: &str) -> Option<Arc<PhysicalConnection>> {
        self.connections.write().remove(name)
    }

    /// Deregister and close a connection. An owned connection is closed by its
    /// owner's release instead.
    pub async fn retire(&self, name: &str) {
        let Some(conn) = self.remove(name) else {
            return;
        };
        conn.retired.store(true, Ordering::Release);
        match conn.owner() {
            FREE => conn.close_if_retired().await,
            owner => debug!(
                connection = %name,
                owner,
                "Retired connection still owned, closing on release"
            ),
        }
    }

    /// Claim a registered connection for `worker`, waiting for a bounded time.
    pub async fn acquire(
        &self,
        name: &str,
        worker: WorkerId,
        max_retries: u32,
        backoff: Duration,
    ) -> DbResult<Arc<PhysicalConnection>> {
        let conn = self
            .lookup(name)
            .ok_or_else(|| DbError::internal(format!("Connection {} is not registered", name)))?;
        conn.claim(worker, max_retries, backoff).await?;
        Ok(conn)
    }

    /// Release `worker`'s claim on a connection.
    ///
    /// Releasing a connection held by someone else is refused and logged; the owner tag
    /// is left unchanged.
    pub async fn release(&self, name: &str, worker: WorkerId) -> DbResult<()> {
        match self.lookup(name) {
            Some(conn) => release_connection(&conn, worker).await,
            None => {
                debug!(connection = %name, "Release of unregistered connection ignored");
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Deregister and close every connection.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<PhysicalConnection>> = {
            let mut connections = self.connections.write();
            connections.drain().map(|(_, conn)| conn).collect()
        };
        let count = drained.len();
        futures_util::future::join_all(drained.iter().map(|conn| conn.close())).await;
        info!(count, "All registered connections closed");
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .finish()
    }
}

/// Release `worker`'s claim on `conn`, closing it when it was retired meanwhile.
pub(crate) async fn release_connection(conn: &PhysicalConnection, worker: WorkerId) -> DbResult<()> {
    match conn.try_release(worker) {
        Ok(()) => {
            conn.close_if_retired().await;
            Ok(())
        }
        Err(owner) => {
            warn!(
                connection = %conn.name(),
                owner,
                caller = %worker,
                "Violation of ownership, release refused"
            );
            Err(DbError::ownership_violation(conn.name(), owner, worker.get()))
        }
    }
}
