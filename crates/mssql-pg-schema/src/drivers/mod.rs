//! Database drivers behind the execution seams.
//!
//! - [`PgExecutor`]: PostgreSQL target over deadpool-postgres
//! - [`MssqlRowSource`]: SQL Server row source over bb8 + Tiberius

pub mod mssql;
pub mod postgres;

pub use mssql::MssqlRowSource;
pub use postgres::PgExecutor;
