//! Backend dispatch macro for reducing code duplication.
//!
//! Each arm of a `DbConnection` match carries a different sqlx connection type, but
//! the body is usually identical. The macro expands the same body once per engine.

/// Expand `$body` for every `DbConnection` variant, binding the inner connection to `$c`.
///
/// # Example
///
/// ```ignore
/// let rows = impl_db_dispatch!(conn, c => {
///     sqlx::raw_sql(sql).execute(&mut *c).await?.rows_affected()
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($conn:expr, $c:ident => $body:expr) => {
        match $conn {
            $crate::db::driver::DbConnection::MySql($c) => $body,
            $crate::db::driver::DbConnection::Postgres($c) => $body,
            $crate::db::driver::DbConnection::SQLite($c) => $body,
        }
    };
}

pub use impl_db_dispatch;
