//! Pool of key-value store connections.
//!
//! A [`DatabaseContext`](super::DatabaseContext) borrows at most one connection per
//! engine and returns it on release. The engines themselves are reached through the
//! [`KvsConnector`] seam; idle sessions are kept per engine up to a fixed bound.

use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Idle sessions kept per engine.
pub const DEFAULT_MAX_IDLE_PER_ENGINE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvsEngine {
    Redis,
    MongoDB,
    Memcached,
}

impl std::fmt::Display for KvsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Redis => write!(f, "Redis"),
            Self::MongoDB => write!(f, "MongoDB"),
            Self::Memcached => write!(f, "Memcached"),
        }
    }
}

/// A live key-value store session.
///
/// Only the lifecycle is pooled here. Engine operations (get, set, find) belong to the
/// connector's concrete session type, reached through [`KvsConnection::session`].
#[async_trait]
pub trait KvsSession: Send + Sync + std::fmt::Debug {
    fn is_open(&self) -> bool;

    async fn close(self: Box<Self>) -> DbResult<()>;
}

/// Opens key-value store sessions.
#[async_trait]
pub trait KvsConnector: Send + Sync + std::fmt::Debug {
    async fn connect(&self, engine: KvsEngine) -> DbResult<Box<dyn KvsSession>>;
}

/// A session borrowed from a [`KvsPool`].
#[derive(Debug)]
pub struct KvsConnection {
    engine: KvsEngine,
    session: Box<dyn KvsSession>,
}

impl KvsConnection {
    pub fn engine(&self) -> KvsEngine {
        self.engine
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    pub fn session(&mut self) -> &mut dyn KvsSession {
        self.session.as_mut()
    }
}

pub struct KvsPool {
    connector: Arc<dyn KvsConnector>,
    max_idle: usize,
    idle: Mutex<HashMap<KvsEngine, Vec<Box<dyn KvsSession>>>>,
}

impl KvsPool {
    pub fn new(connector: Arc<dyn KvsConnector>) -> Self {
        Self::with_max_idle(connector, DEFAULT_MAX_IDLE_PER_ENGINE)
    }

    pub fn with_max_idle(connector: Arc<dyn KvsConnector>, max_idle: usize) -> Self {
        Self {
            connector,
            max_idle,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// Borrow a session for `engine`, reusing an idle one when possible.
    pub async fn acquire(&self, engine: KvsEngine) -> DbResult<KvsConnection> {
        loop {
            let idle = self.idle.lock().get_mut(&engine).and_then(Vec::pop);
            match idle {
                Some(session) if session.is_open() => {
                    debug!(engine = %engine, "Reusing idle key-value session");
                    return Ok(KvsConnection { engine, session });
                }
                Some(session) => {
                    debug!(engine = %engine, "Discarding closed key-value session");
                    drop(session);
                }
                None => break,
            }
        }

        let session = self.connector.connect(engine).await.map_err(|e| {
            warn!(engine = %engine, error = %e, "Failed to open key-value session");
            e
        })?;
        Ok(KvsConnection { engine, session })
    }

    /// Return a borrowed session. Closed sessions and sessions beyond the idle bound
    /// are closed instead of kept.
    pub async fn release(&self, conn: KvsConnection) {
        let KvsConnection { engine, session } = conn;
        let overflow = if session.is_open() {
            let mut idle = self.idle.lock();
            let sessions = idle.entry(engine).or_default();
            if sessions.len() < self.max_idle {
                sessions.push(session);
                None
            } else {
                Some(session)
            }
        } else {
            Some(session)
        };

        if let Some(session) = overflow {
            if let Err(e) = session.close().await {
                debug!(engine = %engine, error = %e, "Error closing key-value session");
            }
        }
    }

    pub fn idle_count(&self, engine: KvsEngine) -> usize {
        self.idle.lock().get(&engine).map_or(0, Vec::len)
    }

    /// Close every idle session.
    pub async fn close_all(&self) {
        let sessions: Vec<Box<dyn KvsSession>> = {
            let mut idle = self.idle.lock();
            idle.drain().flat_map(|(_, s)| s).collect()
        };
        let count = sessions.len();
        for session in sessions {
            let _ = session.close().await;
        }
        info!(count, "Key-value sessions closed");
    }
}

impl std::fmt::Debug for KvsPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let idle = self.idle.lock();
        f.debug_struct("KvsPool")
            .field("max_idle", &self.max_idle)
            .field("idle", &idle.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

/// Error for a context that has no key-value pool configured.
pub(crate) fn kvs_not_configured(engine: KvsEngine) -> DbError {
    DbError::configuration(format!("No key-value pool configured for {}", engine))
}
