//! Error types for the schema migration library.

use thiserror::Error;

/// Main error type for migration operations.
///
/// Pre-execution variants (`CatalogIntegrity`, `CyclicDependency`,
/// `Unmappable`) abort a run before anything touches the target. Execution
/// variants describe a single unit and are contained by the orchestrator.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, bad rules).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The catalog model failed validation. Lists every violation found.
    #[error("Catalog integrity check failed with {} violation(s):\n  - {}", .violations.len(), .violations.join("\n  - "))]
    CatalogIntegrity { violations: Vec<String> },

    /// The dependency graph contains a cycle; the members must be broken
    /// by configuration (e.g. `defer_foreign_keys`).
    #[error("Cyclic dependency between: {}", .members.join(", "))]
    CyclicDependency { members: Vec<String> },

    /// An object could not be translated and the unmappable policy is `abort`.
    #[error("Object {object} cannot be translated: {}", .reasons.join("; "))]
    Unmappable { object: String, reasons: Vec<String> },

    /// A retryable execution failure (connection loss, deadlock, serialization conflict).
    #[error("Transient execution error on {unit}: {message}")]
    TransientExecution { unit: String, message: String },

    /// A non-retryable execution failure.
    #[error("Execution failed on {unit}: {message}")]
    PermanentExecution { unit: String, message: String },

    /// Connection pool error with context.
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Source database error.
    #[error("Source database error: {0}")]
    Source(#[from] tiberius::error::Error),

    /// Target database error.
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// State persistence error.
    #[error("State error: {0}")]
    State(String),

    /// Config hash mismatch on resume.
    #[error("Config has changed since the run was started - cannot resume. Start a new run instead.")]
    ConfigChanged,

    /// IO error (file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a PermanentExecution error.
    pub fn permanent(unit: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::PermanentExecution {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Whether this error happened before any change reached the target.
    pub fn is_pre_execution(&self) -> bool {
        matches!(
            self,
            MigrateError::Config(_)
                | MigrateError::CatalogIntegrity { .. }
                | MigrateError::CyclicDependency { .. }
                | MigrateError::Unmappable { .. }
                | MigrateError::ConfigChanged
        )
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::ConfigChanged => 2,
            MigrateError::CatalogIntegrity { .. }
            | MigrateError::CyclicDependency { .. }
            | MigrateError::Unmappable { .. } => 3,
            MigrateError::TransientExecution { .. }
            | MigrateError::PermanentExecution { .. }
            | MigrateError::Pool { .. }
            | MigrateError::Source(_)
            | MigrateError::Target(_) => 4,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
