//! Error types for the connection pool and transaction layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Each variant carries enough context (connection name, database id) to be logged
//! on its own, and most provide a suggestion for the operator.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid database id {database_id} ({configured} configured)")]
    InvalidDatabaseId { database_id: usize, configured: usize },

    #[error("Connection unavailable: {connection} is held by worker {holder} after {attempts} attempts")]
    ConnectionUnavailable {
        connection: String,
        holder: u64,
        attempts: u32,
    },

    #[error("Pool exhausted for database {database_id}: no available or cached connection")]
    PoolExhausted { database_id: usize },

    #[error("Failed to open {connection}: {message}")]
    DriverOpenFailure {
        connection: String,
        message: String,
        suggestion: String,
    },

    #[error("Ownership violation on {connection}: owned by {owner}, release attempted by {caller}")]
    OwnershipViolation {
        connection: String,
        owner: u64,
        caller: u64,
    },

    #[error("Database {database_id} unavailable: {message}")]
    DatabaseUnavailable { database_id: usize, message: String },

    #[error("Driver error: {message}")]
    Driver {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an invalid database id error.
    pub fn invalid_database_id(database_id: usize, configured: usize) -> Self {
        Self::InvalidDatabaseId {
            database_id,
            configured,
        }
    }

    /// Create a connection unavailable error.
    pub fn connection_unavailable(connection: impl Into<String>, holder: u64, attempts: u32) -> Self {
        Self::ConnectionUnavailable {
            connection: connection.into(),
            holder,
            attempts,
        }
    }

    /// Create a pool exhausted error.
    pub fn pool_exhausted(database_id: usize) -> Self {
        Self::PoolExhausted { database_id }
    }

    /// Create a driver open failure with a helpful suggestion.
    pub fn driver_open_failure(
        connection: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::DriverOpenFailure {
            connection: connection.into(),
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an ownership violation error.
    pub fn ownership_violation(connection: impl Into<String>, owner: u64, caller: u64) -> Self {
        Self::OwnershipViolation {
            connection: connection.into(),
            owner,
            caller,
        }
    }

    /// Create a database unavailable error.
    pub fn database_unavailable(database_id: usize, message: impl Into<String>) -> Self {
        Self::DatabaseUnavailable {
            database_id,
            message: message.into(),
        }
    }

    /// Create a driver error with optional SQL state.
    pub fn driver(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Driver {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::DriverOpenFailure { suggestion, .. } => Some(suggestion),
            Self::Driver { suggestion, .. } => Some(suggestion),
            Self::PoolExhausted { .. } => {
                Some("Increase max_connections or shorten the unit of work")
            }
            Self::ConnectionUnavailable { .. } => {
                Some("Another worker holds the connection; retry the request")
            }
            Self::InvalidDatabaseId { .. } => Some("Check the configured --database list"),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionUnavailable { .. }
                | Self::PoolExhausted { .. }
                | Self::DriverOpenFailure { .. }
        )
    }

    /// Errors the request layer should answer with a generic service-busy response.
    pub fn is_service_busy(&self) -> bool {
        matches!(
            self,
            Self::ConnectionUnavailable { .. }
                | Self::PoolExhausted { .. }
                | Self::DatabaseUnavailable { .. }
        )
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::configuration(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::driver(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::driver(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::Io(io_err) => DbError::driver(
                format!("I/O error: {}", io_err),
                None,
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::driver(
                format!("TLS error: {}", tls_err),
                None,
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::driver(
                format!("Protocol error: {}", msg),
                None,
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
