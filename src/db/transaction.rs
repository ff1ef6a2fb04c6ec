//! One logical transaction bound to one physical connection.
//!
//! A [`Transaction`] is created by a [`DatabaseContext`](super::DatabaseContext) for each
//! logical database it touches. It claims its connection in the registry on `begin` and
//! gives it back through its pool on `release`. Statement-level trace lines
//! (`[BEGIN]`, `[COMMIT]`, `[ROLLBACK]`) go to the `rdb_pool::trace` target.

use crate::db::pool::ConnectionPool;
use crate::db::registry::PhysicalConnection;
use crate::error::{DbError, DbResult};
use crate::models::{TransactionInfo, TransactionState, WorkerId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

macro_rules! trace_sql {
    ($($arg:tt)+) => {
        tracing::info!(target: "rdb_pool::trace", $($arg)+)
    };
}

pub struct Transaction {
    pool: Arc<ConnectionPool>,
    worker: WorkerId,
    tenant: Option<String>,
    connection: Option<Arc<PhysicalConnection>>,
    /// Whether `worker` holds the connection's registry claim.
    claimed: bool,
    enabled: bool,
    active: bool,
    began_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn new(
        pool: Arc<ConnectionPool>,
        worker: WorkerId,
        tenant: Option<String>,
        enabled: bool,
    ) -> Self {
        Self {
            pool,
            worker,
            tenant,
            connection: None,
            claimed: false,
            enabled,
            active: false,
            began_at: None,
        }
    }

    pub fn database_id(&self) -> usize {
        self.pool.database_id()
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn connection(&self) -> Option<&Arc<PhysicalConnection>> {
        self.connection.as_ref()
    }

    pub fn connection_name(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.name())
    }

    /// Toggle explicit transactions. Disabling is refused while a transaction is active.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.active && !enabled {
            warn!(
                database_id = self.database_id(),
                "Cannot disable transactions while one is active"
            );
            return;
        }
        self.enabled = enabled;
    }

    pub fn state(&self) -> TransactionState {
        match (&self.connection, self.active) {
            (_, true) => TransactionState::Active,
            (Some(_), false) => TransactionState::Resolved,
            (None, false) => TransactionState::Absent,
        }
    }

    pub fn info(&self) -> TransactionInfo {
        TransactionInfo {
            database_id: self.database_id(),
            connection: self.connection_name().unwrap_or_default().to_string(),
            tenant: self.tenant.clone(),
            enabled: self.enabled,
            active: self.active,
            began_at: self.began_at,
        }
    }

    /// Take a connection from the pool if none is held yet.
    pub async fn acquire_connection(&mut self) -> DbResult<()> {
        if self.connection.is_none() {
            let conn = self.pool.acquire(self.tenant.as_deref(), self.worker).await?;
            self.claimed = conn.is_owned_by(self.worker);
            self.connection = Some(conn);
        }
        Ok(())
    }

    /// Claim the connection and start a backend transaction.
    ///
    /// Claiming is idempotent for the owner. Disabled or unsupported transactions succeed
    /// without touching the backend; an active transaction is left as is.
    pub async fn begin(&mut self) -> DbResult<()> {
        let conn = self
            .connection
            .clone()
            .ok_or_else(|| DbError::internal("Transaction has no connection"))?;
        let database_id = self.database_id();

        if !(self.claimed && conn.is_owned_by(self.worker)) {
            let timings = *self.pool.timings();
            conn.claim(self.worker, timings.acquire_retries, timings.acquire_backoff)
                .await?;
            self.claimed = true;
        }

        let mut session = conn.session().await;
        let Some(session) = session.as_mut() else {
            return Err(DbError::database_unavailable(
                database_id,
                format!("{} is not open", conn.name()),
            ));
        };

        if !self.enabled || !session.supports_transactions() {
            return Ok(());
        }
        if self.active {
            debug!(connection = %conn.name(), "Transaction already begun");
            return Ok(());
        }

        match session.begin().await {
            Ok(()) => {
                self.active = true;
                self.began_at = Some(Utc::now());
                trace_sql!("[BEGIN] [databaseId:{}] {}", database_id, conn.name());
                Ok(())
            }
            Err(e) => {
                trace_sql!(
                    "[BEGIN Failed] [databaseId:{}] {}: {}",
                    database_id,
                    conn.name(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Commit the active transaction. A no-op when disabled or not active.
    pub async fn commit(&mut self) -> DbResult<()> {
        self.resolve(true).await
    }

    /// Roll back the active transaction. A no-op when disabled or not active.
    pub async fn rollback(&mut self) -> DbResult<()> {
        self.resolve(false).await
    }

    async fn resolve(&mut self, commit: bool) -> DbResult<()> {
        if !self.enabled || !self.active {
            return Ok(());
        }
        // Resolved even when the backend call fails
        self.active = false;
        self.began_at = None;

        let Some(conn) = self.connection.clone() else {
            return Err(DbError::internal("Active transaction has no connection"));
        };
        let result = resolve_session(&conn, commit).await;
        let verb = if commit { "COMMIT" } else { "ROLLBACK" };
        match &result {
            Ok(()) => trace_sql!("[{}] [databaseId:{}] {}", verb, conn.database_id(), conn.name()),
            Err(e) => trace_sql!(
                "[{} Failed] [databaseId:{}] {}: {}",
                verb,
                conn.database_id(),
                conn.name(),
                e
            ),
        }
        result
    }

    /// Run a statement on the held connection.
    pub async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        let conn = self.owned_connection()?;
        let mut session = conn.session().await;
        match session.as_mut() {
            Some(s) => s.execute(sql).await,
            None => Err(DbError::database_unavailable(
                conn.database_id(),
                format!("{} is not open", conn.name()),
            )),
        }
    }

    /// Run a query returning at most one integer.
    pub async fn query_i64(&mut self, sql: &str) -> DbResult<Option<i64>> {
        let conn = self.owned_connection()?;
        let mut session = conn.session().await;
        match session.as_mut() {
            Some(s) => s.query_i64(sql).await,
            None => Err(DbError::database_unavailable(
                conn.database_id(),
                format!("{} is not open", conn.name()),
            )),
        }
    }

    fn owned_connection(&self) -> DbResult<Arc<PhysicalConnection>> {
        let conn = self
            .connection
            .clone()
            .ok_or_else(|| DbError::invalid_input("No connection held; call begin first"))?;
        if !self.claimed || !conn.is_owned_by(self.worker) {
            return Err(DbError::ownership_violation(
                conn.name(),
                conn.owner(),
                self.worker.get(),
            ));
        }
        Ok(conn)
    }

    /// Give the connection back to its pool. `force` closes it.
    ///
    /// A still-active transaction is always force-released so its backend state is
    /// discarded with the session.
    pub async fn release(&mut self, force: bool) -> DbResult<()> {
        let Some(conn) = self.connection.take() else {
            return Ok(());
        };
        let was_active = std::mem::take(&mut self.active);
        self.began_at = None;

        if !std::mem::take(&mut self.claimed) {
            self.pool.return_unclaimed(&conn);
            return Ok(());
        }
        if was_active && !force {
            warn!(connection = %conn.name(), "Releasing an active transaction, closing connection");
        }
        self.pool.release(&conn, self.worker, force || was_active).await
    }
}

async fn resolve_session(conn: &PhysicalConnection, commit: bool) -> DbResult<()> {
    let mut session = conn.session().await;
    match session.as_mut() {
        Some(s) if commit => s.commit().await,
        Some(s) => s.rollback().await,
        None => Err(DbError::database_unavailable(
            conn.database_id(),
            format!("{} closed before the transaction was resolved", conn.name()),
        )),
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("database_id", &self.database_id())
            .field("worker", &self.worker)
            .field("connection", &self.connection_name())
            .field("tenant", &self.tenant)
            .field("enabled", &self.enabled)
            .field("active", &self.active)
            .finish()
    }
}

/// Safety net for transactions dropped without `release`.
///
/// Spawns a task that rolls back an active transaction and force-releases the
/// connection. Without a runtime the session is dropped and the claim given back.
impl Drop for Transaction {
    fn drop(&mut self) {
        let Some(conn) = self.connection.take() else {
            return;
        };
        if !self.claimed {
            self.pool.return_unclaimed(&conn);
            return;
        }

        let pool = Arc::clone(&self.pool);
        let worker = self.worker;
        let active = self.active && self.enabled;
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(connection = %conn.name(), "Transaction dropped outside a runtime");
            pool.abandon(&conn, worker);
            return;
        };

        handle.spawn(async move {
            if active {
                if let Err(e) = resolve_session(&conn, false).await {
                    debug!(connection = %conn.name(), error = %e, "Rollback on drop failed");
                }
                trace_sql!("[ROLLBACK] [databaseId:{}] {}", conn.database_id(), conn.name());
            }
            let _ = pool.release(&conn, worker, true).await;
            warn!(
                connection = %conn.name(),
                "Transaction released via Drop - consider explicit commit or rollback"
            );
        });
    }
}
