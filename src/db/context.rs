//! Per-unit-of-work database context.
//!
//! A [`DatabaseContext`] belongs to one worker for the duration of one unit of work
//! (typically one request). It lazily opens at most one [`Transaction`] per logical
//! database, resolves them all together with [`commit_all`](DatabaseContext::commit_all)
//! or [`rollback_all`](DatabaseContext::rollback_all), and hands every connection back
//! on [`release`](DatabaseContext::release).
//!
//! Transactions are resolved in the order they were created.

use crate::db::kvs::{KvsConnection, KvsEngine, kvs_not_configured};
use crate::db::manager::DatabaseManager;
use crate::db::transaction::Transaction;
use crate::error::{DbError, DbResult};
use crate::models::{TransactionInfo, TransactionState, WorkerId, validate_tenant};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Begin attempts made by `get_connection` before giving up on a database.
const BEGIN_ATTEMPTS: u32 = 2;

/// Per-database settings applied to transactions created later.
#[derive(Debug, Clone)]
struct TransactionPolicy {
    enabled: bool,
    tenant: Option<String>,
}

impl Default for TransactionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            tenant: None,
        }
    }
}

pub struct DatabaseContext {
    id: String,
    manager: Arc<DatabaseManager>,
    worker: WorkerId,
    /// Creation order is resolution order.
    transactions: Vec<Transaction>,
    policies: HashMap<usize, TransactionPolicy>,
    kvs: HashMap<KvsEngine, KvsConnection>,
    idle_since: Option<Instant>,
    released: bool,
}

impl DatabaseContext {
    pub(crate) fn new(manager: Arc<DatabaseManager>, worker: WorkerId) -> Self {
        let id = format!("ctx_{}", uuid::Uuid::new_v4().simple());
        debug!(context = %id, worker = %worker, "Database context created");
        Self {
            id,
            manager,
            worker,
            transactions: Vec::new(),
            policies: HashMap::new(),
            kvs: HashMap::new(),
            idle_since: Some(Instant::now()),
            released: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Time since the context last finished an operation, `None` once released.
    pub fn idle_time(&self) -> Option<Duration> {
        self.idle_since.map(|t| t.elapsed())
    }

    fn touch(&mut self) {
        self.idle_since = Some(Instant::now());
    }

    /// Configure transactions for `database_id`: whether they use explicit
    /// transactions and which tenant they authenticate as.
    ///
    /// Applies to the transaction already open for the database where possible.
    /// Changing the tenant of an open transaction is rejected.
    pub fn set_transaction_policy(
        &mut self,
        database_id: usize,
        enabled: bool,
        tenant: Option<&str>,
    ) -> DbResult<()> {
        self.manager.pool(database_id)?;
        if let Some(tenant) = tenant {
            validate_tenant(tenant).map_err(DbError::invalid_input)?;
        }

        if let Some(tx) = self.find_mut(database_id) {
            if tx.tenant() != tenant {
                return Err(tenant_mismatch(database_id, tx.tenant(), tenant));
            }
            tx.set_enabled(enabled);
        }

        self.policies.insert(
            database_id,
            TransactionPolicy {
                enabled,
                tenant: tenant.map(String::from),
            },
        );
        Ok(())
    }

    /// Return the transaction for `database_id`, beginning one if needed.
    ///
    /// An active (or disabled) transaction is returned as is. A resolved one begins again
    /// on the connection it holds. A begin failure force-closes the connection and retries
    /// once with another connection; the second failure is reported as
    /// [`DbError::DatabaseUnavailable`]. A connection held by another worker is reported
    /// as [`DbError::ConnectionUnavailable`] without retry.
    pub async fn get_connection(
        &mut self,
        database_id: usize,
        tenant: Option<&str>,
    ) -> DbResult<&mut Transaction> {
        let pool = self.manager.pool(database_id)?;
        if let Some(tenant) = tenant {
            validate_tenant(tenant).map_err(DbError::invalid_input)?;
        }

        let policy = self.policies.get(&database_id).cloned().unwrap_or_default();
        let tenant = tenant.map(String::from).or(policy.tenant);

        let pos = match self.position(database_id) {
            Some(pos) => {
                let existing = &self.transactions[pos];
                if existing.tenant() != tenant.as_deref() {
                    return Err(tenant_mismatch(database_id, existing.tenant(), tenant.as_deref()));
                }
                if !existing.is_active() && existing.is_enabled() {
                    let tx = self.transactions.remove(pos);
                    let tx = self.begin_with_retry(tx).await?;
                    self.transactions.insert(pos, tx);
                }
                pos
            }
            None => {
                let tx = Transaction::new(pool, self.worker, tenant, policy.enabled);
                let tx = self.begin_with_retry(tx).await?;
                self.transactions.push(tx);
                self.transactions.len() - 1
            }
        };

        self.touch();
        Ok(&mut self.transactions[pos])
    }

    /// Begin `tx`, retrying once on a fresh connection. A failed transaction is
    /// released before the error is returned.
    async fn begin_with_retry(&self, mut tx: Transaction) -> DbResult<Transaction> {
        let database_id = tx.database_id();
        let mut last_error = None;
        for attempt in 1..=BEGIN_ATTEMPTS {
            tx.acquire_connection().await?;
            match tx.begin().await {
                Ok(()) => return Ok(tx),
                Err(e @ DbError::ConnectionUnavailable { .. }) => {
                    tx.release(false).await?;
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        context = %self.id,
                        database_id,
                        attempt,
                        error = %e,
                        "Begin failed, discarding connection"
                    );
                    if let Err(release_err) = tx.release(true).await {
                        error!(error = %release_err, "Failed to release broken connection");
                    }
                    last_error = Some(e);
                }
            }
        }

        let message = last_error.map_or_else(|| "begin failed".to_string(), |e| e.to_string());
        Err(DbError::database_unavailable(database_id, message))
    }

    /// Borrow a key-value connection for `engine`; the same one is returned for the
    /// rest of the unit of work.
    pub async fn get_kvs_connection(&mut self, engine: KvsEngine) -> DbResult<&mut KvsConnection> {
        if !self.kvs.contains_key(&engine) {
            let pool = self
                .manager
                .kvs_pool()
                .ok_or_else(|| kvs_not_configured(engine))?;
            let conn = pool.acquire(engine).await?;
            self.kvs.insert(engine, conn);
        }
        self.touch();
        self.kvs
            .get_mut(&engine)
            .ok_or_else(|| DbError::internal("Key-value connection vanished"))
    }

    /// Commit every open transaction in creation order and return connections to
    /// their pools. A connection whose commit failed is closed.
    ///
    /// All transactions are processed; the first error is returned.
    pub async fn commit_all(&mut self) -> DbResult<()> {
        let mut first_error = None;
        for mut tx in std::mem::take(&mut self.transactions) {
            let committed = tx.commit().await;
            if let Err(e) = &committed {
                error!(
                    context = %self.id,
                    database_id = tx.database_id(),
                    error = %e,
                    "Commit failed"
                );
            }
            let released = tx.release(committed.is_err()).await;
            if let Err(e) = committed.and(released) {
                first_error.get_or_insert(e);
            }
        }
        self.touch();
        first_error.map_or(Ok(()), Err)
    }

    /// Roll back every open transaction in creation order and close their connections.
    pub async fn rollback_all(&mut self) -> DbResult<()> {
        let mut first_error = None;
        for mut tx in std::mem::take(&mut self.transactions) {
            if let Err(e) = resolve_and_release(&mut tx, false).await {
                first_error.get_or_insert(e);
            }
        }
        self.touch();
        first_error.map_or(Ok(()), Err)
    }

    /// Commit the transaction of one database and return its connection.
    pub async fn commit(&mut self, database_id: usize) -> DbResult<()> {
        self.manager.pool(database_id)?;
        let Some(pos) = self.position(database_id) else {
            return Ok(());
        };
        let mut tx = self.transactions.remove(pos);
        let result = resolve_and_release(&mut tx, true).await;
        self.touch();
        result
    }

    /// Roll back the transaction of one database and close its connection.
    pub async fn rollback(&mut self, database_id: usize) -> DbResult<()> {
        self.manager.pool(database_id)?;
        let Some(pos) = self.position(database_id) else {
            return Ok(());
        };
        let mut tx = self.transactions.remove(pos);
        let result = resolve_and_release(&mut tx, false).await;
        self.touch();
        result
    }

    /// Roll back everything, return key-value connections and forget all policies.
    pub async fn release(&mut self) -> DbResult<()> {
        let result = self.rollback_all().await;
        if let Some(pool) = self.manager.kvs_pool() {
            for (_, conn) in self.kvs.drain() {
                pool.release(conn).await;
            }
        }
        self.kvs.clear();
        self.policies.clear();
        self.idle_since = None;
        self.released = true;
        debug!(context = %self.id, "Database context released");
        result
    }

    pub fn state(&self, database_id: usize) -> TransactionState {
        self.find(database_id)
            .map_or(TransactionState::Absent, Transaction::state)
    }

    /// Snapshot of the open transactions, in creation order.
    pub fn transactions(&self) -> Vec<TransactionInfo> {
        self.transactions.iter().map(Transaction::info).collect()
    }

    fn position(&self, database_id: usize) -> Option<usize> {
        self.transactions
            .iter()
            .position(|tx| tx.database_id() == database_id)
    }

    fn find(&self, database_id: usize) -> Option<&Transaction> {
        self.transactions
            .iter()
            .find(|tx| tx.database_id() == database_id)
    }

    fn find_mut(&mut self, database_id: usize) -> Option<&mut Transaction> {
        self.transactions
            .iter_mut()
            .find(|tx| tx.database_id() == database_id)
    }
}

/// Commit (normal release, forced when the commit failed) or roll back (forced release).
async fn resolve_and_release(tx: &mut Transaction, commit: bool) -> DbResult<()> {
    let resolved = if commit {
        tx.commit().await
    } else {
        tx.rollback().await
    };
    let force = !commit || resolved.is_err();
    let released = tx.release(force).await;
    resolved.and(released)
}

fn tenant_mismatch(database_id: usize, existing: Option<&str>, requested: Option<&str>) -> DbError {
    DbError::invalid_input(format!(
        "Database {} already has a transaction for tenant {:?}, requested {:?}",
        database_id, existing, requested
    ))
}

impl std::fmt::Debug for DatabaseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseContext")
            .field("id", &self.id)
            .field("worker", &self.worker)
            .field("transactions", &self.transactions)
            .field("kvs", &self.kvs.keys().collect::<Vec<_>>())
            .field("released", &self.released)
            .finish()
    }
}

/// Contexts dropped without `release` roll back in the background.
impl Drop for DatabaseContext {
    fn drop(&mut self) {
        if self.transactions.is_empty() && self.kvs.is_empty() {
            return;
        }
        let mut transactions = std::mem::take(&mut self.transactions);
        let kvs: Vec<KvsConnection> = self.kvs.drain().map(|(_, c)| c).collect();
        let kvs_pool = self.manager.kvs_pool();
        let id = self.id.clone();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // Each transaction's own Drop gives its connection back
            return;
        };
        handle.spawn(async move {
            for tx in transactions.iter_mut() {
                let _ = resolve_and_release(tx, false).await;
            }
            if let Some(pool) = kvs_pool {
                for conn in kvs {
                    pool.release(conn).await;
                }
            }
            warn!(context = %id, "Context released via Drop - consider explicit release()");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseSettings, PoolTimings};
    use crate::db::kvs::KvsPool;
    use crate::db::mock::{MockConnector, MockKvsConnector};

    fn manager(connector: &MockConnector, urls: &[&str]) -> Arc<DatabaseManager> {
        let settings = urls
            .iter()
            .enumerate()
            .map(|(id, url)| DatabaseSettings::parse(id, url, 2).unwrap())
            .collect();
        let timings = PoolTimings {
            acquire_retries: 2,
            acquire_backoff: Duration::from_millis(5),
            ..PoolTimings::default()
        };
        DatabaseManager::new(settings, timings, Arc::new(connector.clone()), None).unwrap()
    }

    #[tokio::test]
    async fn test_get_connection_reuses_slot() {
        let connector = MockConnector::new();
        let mgr = manager(&connector, &["sqlite::memory:"]);
        let mut ctx = mgr.context();

        let first = ctx.get_connection(0, None).await.unwrap().connection_name().map(String::from);
        let second = ctx.get_connection(0, None).await.unwrap().connection_name().map(String::from);
        assert_eq!(first, second);
        assert_eq!(connector.state().begins(), 1);
        assert_eq!(ctx.state(0), TransactionState::Active);

        ctx.commit_all().await.unwrap();
        assert_eq!(ctx.state(0), TransactionState::Absent);
        assert_eq!(connector.state().commits(), 1);
        ctx.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_database_id() {
        let connector = MockConnector::new();
        let mgr = manager(&connector, &["sqlite::memory:"]);
        let mut ctx = mgr.context();
        let err = ctx.get_connection(4, None).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::InvalidDatabaseId {
                database_id: 4,
                configured: 1
            }
        ));
        assert!(ctx.commit(4).await.is_err());
        assert!(ctx.set_transaction_policy(4, true, None).is_err());
    }

    #[tokio::test]
    async fn test_begin_failure_retries_once() {
        let connector = MockConnector::new();
        let mgr = manager(&connector, &["sqlite::memory:"]);
        let mut ctx = mgr.context();
        connector.state().fail_next_begins(1);

        ctx.get_connection(0, None).await.unwrap();
        assert_eq!(connector.state().opens(), 2);
        assert_eq!(connector.state().closes(), 1);
        ctx.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_begin_failure_twice_is_database_unavailable() {
        let connector = MockConnector::new();
        let mgr = manager(&connector, &["sqlite::memory:"]);
        let mut ctx = mgr.context();
        connector.state().fail_next_begins(2);

        let err = ctx.get_connection(0, None).await.unwrap_err();
        assert!(matches!(err, DbError::DatabaseUnavailable { database_id: 0, .. }));
        assert!(ctx.transactions().is_empty());

        let stats = mgr.stats();
        assert_eq!(stats[0].in_use(), 0);
        ctx.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_all_in_creation_order() {
        let connector = MockConnector::new();
        let mgr = manager(&connector, &["sqlite::memory:", "sqlite::memory:"]);
        let mut ctx = mgr.context();

        ctx.get_connection(1, None).await.unwrap();
        ctx.get_connection(0, None).await.unwrap();
        let order: Vec<usize> = ctx.transactions().iter().map(|t| t.database_id).collect();
        assert_eq!(order, vec![1, 0]);

        ctx.commit_all().await.unwrap();
        assert_eq!(connector.state().commits(), 2);
        assert!(mgr.stats().iter().all(|s| s.cached == 1));
        ctx.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_all_continues_after_failure() {
        let connector = MockConnector::new();
        let mgr = manager(&connector, &["sqlite::memory:", "sqlite::memory:"]);
        let mut ctx = mgr.context();
        ctx.get_connection(0, None).await.unwrap();
        ctx.get_connection(1, None).await.unwrap();
        connector.state().set_fail_commit(true);

        assert!(ctx.commit_all().await.is_err());
        assert!(ctx.transactions().is_empty());
        // Failed commits close their connections
        assert_eq!(connector.state().closes(), 2);
        assert!(mgr.stats().iter().all(|s| s.in_use() == 0));
        ctx.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_all_closes_connections() {
        let connector = MockConnector::new();
        let mgr = manager(&connector, &["sqlite::memory:"]);
        let mut ctx = mgr.context();
        ctx.get_connection(0, None).await.unwrap();

        ctx.rollback_all().await.unwrap();
        assert_eq!(connector.state().rollbacks(), 1);
        assert_eq!(mgr.stats()[0].available, 2);
        ctx.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_single_database_commit() {
        let connector = MockConnector::new();
        let mgr = manager(&connector, &["sqlite::memory:", "sqlite::memory:"]);
        let mut ctx = mgr.context();
        ctx.get_connection(0, None).await.unwrap();
        ctx.get_connection(1, None).await.unwrap();

        ctx.commit(0).await.unwrap();
        assert_eq!(ctx.state(0), TransactionState::Absent);
        assert_eq!(ctx.state(1), TransactionState::Active);
        ctx.rollback(1).await.unwrap();
        assert_eq!(connector.state().commits(), 1);
        assert_eq!(connector.state().rollbacks(), 1);
        // Nothing left to resolve
        ctx.commit(1).await.unwrap();
        ctx.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_resolved_transaction_begins_again() {
        let connector = MockConnector::new();
        let mgr = manager(&connector, &["sqlite::memory:"]);
        let mut ctx = mgr.context();
        ctx.get_connection(0, None).await.unwrap().commit().await.unwrap();
        assert_eq!(ctx.state(0), TransactionState::Resolved);

        let tx = ctx.get_connection(0, None).await.unwrap();
        assert!(tx.is_active());
        assert_eq!(ctx.state(0), TransactionState::Active);
        assert_eq!(connector.state().begins(), 2);
        assert_eq!(connector.state().opens(), 1);

        ctx.commit_all().await.unwrap();
        assert_eq!(connector.state().commits(), 2);
        ctx.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_reenabled_policy_begins_on_next_request() {
        let connector = MockConnector::new();
        let mgr = manager(&connector, &["sqlite::memory:"]);
        let mut ctx = mgr.context();
        ctx.set_transaction_policy(0, false, None).unwrap();
        ctx.get_connection(0, None).await.unwrap();
        assert_eq!(connector.state().begins(), 0);

        ctx.set_transaction_policy(0, true, None).unwrap();
        assert!(ctx.get_connection(0, None).await.unwrap().is_active());
        assert_eq!(connector.state().begins(), 1);
        assert_eq!(ctx.transactions().len(), 1);
        ctx.release().await.unwrap();
        assert_eq!(connector.state().rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_rollback_all_resolves_despite_backend_failure() {
        let connector = MockConnector::new();
        let mgr = manager(&connector, &["sqlite::memory:"]);
        let mut ctx = mgr.context();
        let conn = Arc::clone(ctx.get_connection(0, None).await.unwrap().connection().unwrap());
        connector.state().set_fail_rollback(true);

        let err = ctx.rollback_all().await.unwrap_err();
        assert!(matches!(err, DbError::Driver { .. }));
        assert!(ctx.transactions().is_empty());
        assert_eq!(ctx.state(0), TransactionState::Absent);
        // Force-released despite the failure
        assert!(!conn.is_open());
        assert_eq!(conn.owner(), 0);
        assert_eq!(mgr.stats()[0].in_use(), 0);
        ctx.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_policy_disables_transactions() {
        let connector = MockConnector::new();
        let mgr = manager(&connector, &["sqlite::memory:"]);
        let mut ctx = mgr.context();
        ctx.set_transaction_policy(0, false, None).unwrap();

        let tx = ctx.get_connection(0, None).await.unwrap();
        assert!(!tx.is_enabled());
        assert_eq!(ctx.state(0), TransactionState::Resolved);
        ctx.commit_all().await.unwrap();
        assert_eq!(connector.state().begins(), 0);
        ctx.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_policy_tenant_and_mismatch() {
        let connector = MockConnector::new();
        let mgr = manager(&connector, &["sqlite::memory:?tenant=true"]);
        let mut ctx = mgr.context();
        ctx.set_transaction_policy(0, true, Some("alice")).unwrap();

        let tx = ctx.get_connection(0, None).await.unwrap();
        assert_eq!(tx.connection_name(), Some("udb00_alice"));

        let err = ctx.get_connection(0, Some("bob")).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert!(ctx.set_transaction_policy(0, true, Some("bob")).is_err());
        ctx.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_tenant_held_by_other_context() {
        let connector = MockConnector::new();
        let mgr = manager(&connector, &["sqlite::memory:?tenant=true"]);
        let mut first = mgr.context();
        let mut second = mgr.context();

        first.get_connection(0, Some("alice")).await.unwrap();
        let err = second.get_connection(0, Some("alice")).await.unwrap_err();
        assert!(matches!(err, DbError::ConnectionUnavailable { .. }));
        // The holder's connection was not closed
        assert_eq!(connector.state().closes(), 0);

        first.commit_all().await.unwrap();
        second.get_connection(0, Some("alice")).await.unwrap();
        second.release().await.unwrap();
        first.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_clears_everything() {
        let connector = MockConnector::new();
        let mgr = manager(&connector, &["sqlite::memory:"]);
        let mut ctx = mgr.context();
        ctx.set_transaction_policy(0, false, None).unwrap();
        ctx.get_connection(0, None).await.unwrap();

        ctx.release().await.unwrap();
        assert!(ctx.transactions().is_empty());
        assert!(ctx.idle_time().is_none());

        // Policies were forgotten
        assert!(ctx.get_connection(0, None).await.unwrap().is_enabled());
        ctx.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_time_tracks_activity() {
        let connector = MockConnector::new();
        let mgr = manager(&connector, &["sqlite::memory:"]);
        let mut ctx = mgr.context();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(ctx.idle_time().unwrap() >= Duration::from_millis(30));

        ctx.get_connection(0, None).await.unwrap();
        assert!(ctx.idle_time().unwrap() < Duration::from_millis(30));
        ctx.release().await.unwrap();
        assert!(ctx.idle_time().is_none());
    }

    #[tokio::test]
    async fn test_kvs_without_pool() {
        let connector = MockConnector::new();
        let mgr = manager(&connector, &["sqlite::memory:"]);
        let mut ctx = mgr.context();
        let err = ctx.get_kvs_connection(KvsEngine::Redis).await.unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_kvs_connection_held_for_unit_of_work() {
        let kvs_connector = Arc::new(MockKvsConnector::default());
        let kvs = Arc::new(KvsPool::new(kvs_connector.clone()));
        let settings = vec![DatabaseSettings::parse(0, "sqlite::memory:", 1).unwrap()];
        let mgr = DatabaseManager::new(
            settings,
            PoolTimings::default(),
            Arc::new(MockConnector::new()),
            Some(Arc::clone(&kvs)),
        )
        .unwrap();

        let mut ctx = mgr.context();
        assert_eq!(
            ctx.get_kvs_connection(KvsEngine::Redis).await.unwrap().engine(),
            KvsEngine::Redis
        );
        ctx.get_kvs_connection(KvsEngine::Redis).await.unwrap();
        assert_eq!(kvs_connector.connects(), 1);
        assert_eq!(kvs.idle_count(KvsEngine::Redis), 0);

        ctx.release().await.unwrap();
        assert_eq!(kvs.idle_count(KvsEngine::Redis), 1);
    }

    #[tokio::test]
    async fn test_dropped_context_rolls_back() {
        let connector = MockConnector::new();
        let mgr = manager(&connector, &["sqlite::memory:"]);
        {
            let mut ctx = mgr.context();
            ctx.get_connection(0, None).await.unwrap();
        }
        for _ in 0..50 {
            if mgr.stats()[0].in_use() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(mgr.stats()[0].in_use(), 0);
        assert_eq!(connector.state().rollbacks(), 1);
    }
}
