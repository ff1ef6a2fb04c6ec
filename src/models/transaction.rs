//! Transaction snapshot models.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle of one logical-database slot inside a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// No transaction has been opened for the slot.
    Absent,
    /// A connection is held and `begin` succeeded.
    Active,
    /// Commit or rollback completed; the connection is still held.
    Resolved,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Active => write!(f, "active"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

/// Metadata about a held transaction (for listing without consuming).
#[derive(Debug, Clone, Serialize)]
pub struct TransactionInfo {
    pub database_id: usize,
    pub connection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    pub enabled: bool,
    pub active: bool,
    /// When the backend transaction started (absolute time)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub began_at: Option<DateTime<Utc>>,
}

/// Point-in-time counters for one connection pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub database_id: usize,
    pub max_connections: u32,
    /// Cold names: never opened or closed by reclamation.
    pub available: usize,
    /// Warm names: open and idle.
    pub cached: usize,
    /// Tenant connections resident in the tenant cache.
    pub tenants: usize,
}

impl PoolStats {
    /// Pooled names currently handed out to workers.
    pub fn in_use(&self) -> usize {
        (self.max_connections as usize).saturating_sub(self.available + self.cached)
    }
}
