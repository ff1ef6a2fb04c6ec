//! Relational connection pool library
//!
//! This library keeps a bounded set of physical connections per logical database,
//! hands them to units of work with exclusive ownership, and drives the
//! begin/commit/rollback lifecycle of the transactions running on them
//! (SQLite, PostgreSQL, MySQL).

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::Config;
pub use db::{DatabaseContext, DatabaseManager};
pub use error::{DbError, DbResult};
