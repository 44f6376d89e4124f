//! Configuration type definitions with auto-tuning based on system resources.

use crate::resolver::{ParamMatch, TypeFamily};
use serde::{Deserialize, Serialize};
use std::fmt;
use sysinfo::System;
use tracing::info;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let total_memory_gb = sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        let cpu_cores = sys.cpus().len();

        Self {
            total_memory_gb,
            cpu_cores,
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (MSSQL).
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Ordered type mapping rules, consulted before the built-in table.
    #[serde(default)]
    pub type_mappings: Vec<TypeMappingRule>,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.migration = self.migration.with_auto_tuning(&resources);
        self
    }
}

/// Source database (MSSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Default source schema (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: "true").
    #[serde(default = "default_true_string")]
    pub encrypt: String,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Target schema the source default schema maps to (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "prefer").
    #[serde(default = "default_prefer")]
    pub ssl_mode: String,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Migration behavior configuration.
/// Concurrency fields use Option<T> to distinguish between
/// "not set" (use auto-tuned default) and "explicitly set" (use provided value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Concurrent workers. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_count: Option<usize>,

    /// Rows per data-transfer transaction (default: 5000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Retries for transient failures per unit or batch (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Exponential backoff between retries.
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// What happens to other units when one fails permanently.
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// What happens to objects that cannot be translated.
    #[serde(default)]
    pub unmappable_policy: UnmappablePolicy,

    /// Build and report the plan without touching the target.
    #[serde(default)]
    pub dry_run: bool,

    /// Object name patterns to exclude (`*` and `?` wildcards).
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Foreign key constraint names to create as `NOT VALID`, breaking cycles.
    #[serde(default)]
    pub defer_foreign_keys: Vec<String>,

    /// Transfer table data after creating tables (default: true).
    #[serde(default = "default_true")]
    pub transfer_data: bool,

    /// Case policy for target identifiers (default: lower).
    #[serde(default)]
    pub identifier_case: IdentifierCase,

    /// Maximum MSSQL connections. Auto-tuned based on workers if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_source_connections: Option<usize>,

    /// Maximum PostgreSQL connections. Auto-tuned based on workers if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_target_connections: Option<usize>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            backoff: BackoffConfig::default(),
            failure_policy: FailurePolicy::default(),
            unmappable_policy: UnmappablePolicy::default(),
            dry_run: false,
            exclude: Vec::new(),
            defer_foreign_keys: Vec::new(),
            transfer_data: true,
            identifier_case: IdentifierCase::default(),
            max_source_connections: None,
            max_target_connections: None,
        }
    }
}

impl MigrationConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        let cores = resources.cpu_cores;

        // Workers: cores - 2, clamped to 2..=16
        let workers = *self
            .worker_count
            .get_or_insert_with(|| cores.saturating_sub(2).clamp(2, 16));

        // Connection pool sizes: scale with workers
        let source_conns = *self
            .max_source_connections
            .get_or_insert_with(|| (workers * 2).clamp(4, 64));
        let target_conns = *self
            .max_target_connections
            .get_or_insert_with(|| (workers * 2).clamp(4, 64));

        info!(
            "Auto-tuned config: workers={}, batch_size={}, source_conns={}, target_conns={}",
            workers, self.batch_size, source_conns, target_conns
        );

        self
    }

    // Accessors that return the effective value when the config hasn't been auto-tuned

    pub fn get_worker_count(&self) -> usize {
        self.worker_count.unwrap_or(4)
    }

    pub fn get_max_source_connections(&self) -> usize {
        self.max_source_connections.unwrap_or(8)
    }

    pub fn get_max_target_connections(&self) -> usize {
        self.max_target_connections.unwrap_or(8)
    }
}

/// Exponential backoff parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

/// Response to a unit's permanent failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop dispatching anything new.
    AbortAll,

    /// Skip only units that transitively depend on the failed one.
    #[default]
    AbortDependents,
}

/// Response to an object that cannot be translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmappablePolicy {
    /// Skip the object and everything depending on it.
    Skip,

    /// Refuse to start the run.
    Abort,

    /// Keep the object in the plan; its unit fails without retry and is
    /// reported for manual review.
    #[default]
    ManualReview,
}

/// Case policy for target identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierCase {
    Preserve,
    #[default]
    Lower,
}

/// One configured type mapping rule.
///
/// ```yaml
/// type_mappings:
///   - source: nvarchar
///     length: { min: 1, max: 4000 }
///     target: "varchar({length})"
///   - family: nchar
///     target: text
///     default: true
///   - source: char
///     target: text
///     transform: rtrim
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeMappingRule {
    /// Exact source type name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Source type family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<TypeFamily>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<ParamMatch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<ParamMatch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<ParamMatch>,

    /// Target type template.
    pub target: String,

    /// Value transform name (bit_to_bool, uuid_lowercase, rtrim).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,

    /// Marks the rule as the configured default for its family.
    #[serde(default)]
    pub default: bool,
}

// Default value functions for serde
fn default_mssql_port() -> u16 {
    1433
}

fn default_pg_port() -> u16 {
    5432
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_true_string() -> String {
    "true".to_string()
}

fn default_prefer() -> String {
    "prefer".to_string()
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    5_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}
