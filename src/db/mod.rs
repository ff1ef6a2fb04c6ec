//! Connection pooling and transaction lifecycle.
//!
//! This module provides:
//! - The process-wide connection registry (ownership arbitration)
//! - Per-database pools with pooled and tenant-scoped connections
//! - The tenant LRU cache
//! - Transactions and the per-unit-of-work database context
//! - The key-value store connection pool
//! - The driver seam and its sqlx implementation

pub mod context;
pub mod driver;
pub mod kvs;
#[macro_use]
pub mod macros;
pub mod manager;
pub mod pool;
pub mod registry;
pub mod tenant_cache;
pub mod transaction;

#[cfg(test)]
pub(crate) mod mock;

pub use context::DatabaseContext;
pub use driver::{ConnectTarget, Connector, DbConnection, Session, SqlxConnector};
pub use kvs::{KvsConnection, KvsConnector, KvsEngine, KvsPool, KvsSession};
pub use manager::DatabaseManager;
pub use pool::ConnectionPool;
pub use registry::{ConnectionRegistry, PhysicalConnection};
pub use tenant_cache::TenantCache;
pub use transaction::Transaction;
