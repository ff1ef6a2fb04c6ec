//! Connection-related data models.
//!
//! This module defines the database engine types, worker identities and the
//! naming scheme for physical connections.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::MySQL => Some(3306),
            Self::SQLite => None,
        }
    }

    /// Whether the engine has a native upsert statement.
    pub fn supports_upsert(&self) -> bool {
        // ON CONFLICT / ON DUPLICATE KEY; SQLite since 3.24
        true
    }

    /// Whether tenant connections authenticate with client certificates.
    pub fn uses_client_certificates(&self) -> bool {
        !matches!(self, Self::SQLite)
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Identity of the worker (one in-flight unit of work) holding a connection.
///
/// The registry stores owner tags as plain `u64`, where `0` means "free" and
/// `u64::MAX` marks a connection being retired; a `WorkerId` is neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(NonZeroU64);

impl WorkerId {
    /// Create a worker id. Returns `None` for the reserved tags.
    pub fn new(id: u64) -> Option<Self> {
        if id == u64::MAX {
            return None;
        }
        NonZeroU64::new(id).map(Self)
    }

    /// Raw owner tag as stored in the registry.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a pooled (shared) connection slot, e.g. `rdb00_3`.
pub fn pooled_connection_name(database_id: usize, slot: u32) -> String {
    format!("rdb{:02}_{}", database_id, slot)
}

/// Name of a tenant-scoped connection, e.g. `udb01_alice`.
pub fn tenant_connection_name(database_id: usize, tenant: &str) -> String {
    format!("udb{:02}_{}", database_id, tenant)
}

/// Validate a tenant identifier before it becomes part of a connection name
/// and a certificate path.
pub fn validate_tenant(tenant: &str) -> Result<(), String> {
    if tenant.is_empty() {
        return Err("Tenant identifier cannot be empty".to_string());
    }
    if !tenant
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.' || c == '@')
    {
        return Err(format!(
            "Tenant identifier '{}' contains invalid characters",
            tenant
        ));
    }
    if tenant.starts_with('.') {
        return Err(format!("Tenant identifier '{}' cannot start with '.'", tenant));
    }
    Ok(())
}
