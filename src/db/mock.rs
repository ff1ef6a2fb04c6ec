//! Scriptable in-memory backend for unit tests.

use crate::db::driver::{ConnectTarget, Connector, Session};
use crate::db::kvs::{KvsConnector, KvsEngine, KvsSession};
use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Counters and failure switches shared by a connector and all of its sessions.
#[derive(Debug, Default)]
pub(crate) struct MockState {
    opens: AtomicUsize,
    closes: AtomicUsize,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    /// Number of upcoming opens that fail.
    fail_opens: AtomicUsize,
    /// Number of upcoming begins that fail.
    fail_begins: AtomicUsize,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
    no_transactions: AtomicBool,
    statements: Mutex<Vec<String>>,
    opened_names: Mutex<Vec<String>>,
}

impl MockState {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    pub fn opened_names(&self) -> Vec<String> {
        self.opened_names.lock().clone()
    }

    pub fn fail_next_opens(&self, n: usize) {
        self.fail_opens.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_begins(&self, n: usize) {
        self.fail_begins.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_rollback(&self, fail: bool) {
        self.fail_rollback.store(fail, Ordering::SeqCst);
    }

    pub fn set_no_transactions(&self, on: bool) {
        self.no_transactions.store(on, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &Arc<MockState> {
        &self.state
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &ConnectTarget<'_>) -> DbResult<Box<dyn Session>> {
        if MockState::take_failure(&self.state.fail_opens) {
            return Err(DbError::driver_open_failure(
                target.name,
                "connection refused",
                "mock",
            ));
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.state.opened_names.lock().push(target.name.to_string());
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
        }))
    }
}

#[derive(Debug)]
struct MockSession {
    state: Arc<MockState>,
}

#[async_trait]
impl Session for MockSession {
    fn supports_transactions(&self) -> bool {
        !self.state.no_transactions.load(Ordering::SeqCst)
    }

    async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        self.state.statements.lock().push(sql.to_string());
        Ok(1)
    }

    async fn query_i64(&mut self, _sql: &str) -> DbResult<Option<i64>> {
        Ok(Some(1))
    }

    async fn begin(&mut self) -> DbResult<()> {
        if MockState::take_failure(&self.state.fail_begins) {
            return Err(DbError::driver("server closed the connection", None, "mock"));
        }
        self.state.begins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        if self.state.fail_commit.load(Ordering::SeqCst) {
            return Err(DbError::driver("serialization failure", Some("40001".into()), "mock"));
        }
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if self.state.fail_rollback.load(Ordering::SeqCst) {
            return Err(DbError::driver("connection reset by peer", None, "mock"));
        }
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Key-value connector whose sessions can be closed from the test.
#[derive(Debug, Default)]
pub(crate) struct MockKvsConnector {
    connects: AtomicUsize,
    sessions: Mutex<Vec<Arc<AtomicBool>>>,
}

impl MockKvsConnector {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Simulate the server dropping every session handed out so far.
    pub fn close_all_sessions(&self) {
        for open in self.sessions.lock().iter() {
            open.store(false, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl KvsConnector for MockKvsConnector {
    async fn connect(&self, engine: KvsEngine) -> DbResult<Box<dyn KvsSession>> {
        if engine == KvsEngine::Memcached {
            return Err(DbError::driver_open_failure("memcached", "connection refused", "mock"));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let open = Arc::new(AtomicBool::new(true));
        self.sessions.lock().push(Arc::clone(&open));
        Ok(Box::new(MockKvsSession { open }))
    }
}

#[derive(Debug)]
struct MockKvsSession {
    open: Arc<AtomicBool>,
}

#[async_trait]
impl KvsSession for MockKvsSession {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}
