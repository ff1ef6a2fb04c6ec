//! Data models for the connection pool.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod transaction;

// Re-export commonly used types
pub use connection::{
    DatabaseType, WorkerId, pooled_connection_name, tenant_connection_name, validate_tenant,
};
pub use transaction::{PoolStats, TransactionInfo, TransactionState};
