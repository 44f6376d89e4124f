//! # mssql-pg-schema
//!
//! Schema translation and migration orchestration from Microsoft SQL Server
//! to PostgreSQL.
//!
//! The library turns an extracted source catalog into an ordered, resumable
//! migration plan and executes it against the target:
//!
//! - **Catalog model** validated for referential integrity and unique names
//! - **Rule-driven type resolution** with a mapping audit trail
//! - **DDL and routine translation** (T-SQL procedures to PL/pgSQL)
//! - **Dependency ordering** with deterministic tie-breaks and cycle detection
//! - **Orchestrated execution** with retry, failure policies, dry-run and resume
//! - **Advisory analysis** of compatibility and performance
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_pg_schema::{Catalog, Config, Orchestrator};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> mssql_pg_schema::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let catalog = Catalog::load("catalog.json")?;
//!     let orchestrator = Orchestrator::new(config, Arc::new(catalog))?;
//!     let report = orchestrator.run(None, true).await?;
//!     println!("{}", report.to_json()?);
//!     Ok(())
//! }
//! ```

pub mod analyzer;
pub mod catalog;
pub mod config;
pub mod drivers;
pub mod error;
pub mod exec;
pub mod graph;
pub mod orchestrator;
pub mod plan;
pub mod resolver;
pub mod state;
pub mod translate;

// Re-exports for convenient access
pub use analyzer::{Finding, Severity};
pub use catalog::{Catalog, ObjectKind, QualifiedName, SchemaObject};
pub use config::{Config, FailurePolicy, MigrationConfig, UnmappablePolicy};
pub use error::{MigrateError, Result};
pub use exec::{ExecError, ExecErrorKind, RowSource, SqlValue, TargetExecutor, TargetTransaction};
pub use graph::DependencyGraph;
pub use orchestrator::{MigrationReport, Orchestrator, UnitStatus};
pub use plan::{MigrationPlan, PlanBuilder, UnitKind};
pub use resolver::{Resolution, Resolver};
pub use state::{FileStateBackend, MemoryStateBackend, RunState, StateBackend};
pub use translate::{Translator, TranslationStatus};
