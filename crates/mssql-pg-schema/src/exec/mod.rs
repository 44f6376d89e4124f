//! Execution seams between the orchestrator and the databases.
//!
//! The orchestrator only sees a [`TargetExecutor`] that hands out
//! [`TargetTransaction`]s and a [`RowSource`] that reads deterministic
//! batches. Concrete drivers live in [`crate::drivers`]; tests use scripted
//! fakes.

#[cfg(test)]
pub(crate) mod fake;

use crate::catalog::QualifiedName;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Classification of an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecErrorKind {
    ConnectionLost,
    Deadlock,
    SerializationFailure,
    ConstraintViolation,
    Syntax,
    Unmappable,
    Other,
}

impl ExecErrorKind {
    /// Classify a SQLSTATE code.
    pub fn from_sqlstate(code: &str) -> Self {
        match code {
            "40P01" => ExecErrorKind::Deadlock,
            "40001" => ExecErrorKind::SerializationFailure,
            // admin_shutdown: the server went away under us
            "57P01" => ExecErrorKind::ConnectionLost,
            c if c.starts_with("08") => ExecErrorKind::ConnectionLost,
            c if c.starts_with("23") => ExecErrorKind::ConstraintViolation,
            c if c.starts_with("42") => ExecErrorKind::Syntax,
            _ => ExecErrorKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecErrorKind::ConnectionLost => "connection_lost",
            ExecErrorKind::Deadlock => "deadlock",
            ExecErrorKind::SerializationFailure => "serialization_failure",
            ExecErrorKind::ConstraintViolation => "constraint_violation",
            ExecErrorKind::Syntax => "syntax",
            ExecErrorKind::Unmappable => "unmappable",
            ExecErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ExecErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed failure returned by an executor or row source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ExecError {
    pub kind: ExecErrorKind,
    pub message: String,
    pub sqlstate: Option<String>,
}

impl ExecError {
    pub fn new(kind: ExecErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            sqlstate: None,
        }
    }

    /// Build an error from a SQLSTATE code, deriving the kind from it.
    pub fn with_sqlstate(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            kind: ExecErrorKind::from_sqlstate(&code),
            message: message.into(),
            sqlstate: Some(code),
        }
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::ConnectionLost, message)
    }

    /// Whether retrying the same work may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ExecErrorKind::ConnectionLost
                | ExecErrorKind::Deadlock
                | ExecErrorKind::SerializationFailure
        )
    }
}

/// SQL value for type-safe row handling.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

/// One deterministic slice of a source table.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Source table.
    pub table: QualifiedName,
    /// Source column names in insert order.
    pub columns: Vec<String>,
    /// Columns giving the stable row order (primary key, or all columns).
    pub order_by: Vec<String>,
    /// Zero-based batch number.
    pub batch_index: u64,
    /// Rows per batch.
    pub batch_size: usize,
}

impl BatchRequest {
    /// Number of rows preceding this batch.
    pub fn offset(&self) -> u64 {
        self.batch_index * self.batch_size as u64
    }
}

/// Transactional executor for the target database.
#[async_trait]
pub trait TargetExecutor: Send + Sync {
    /// Open a new transaction scoped to a single unit or batch.
    async fn begin(&self) -> Result<Box<dyn TargetTransaction>, ExecError>;

    /// Name of the executor for logging.
    fn executor_type(&self) -> &'static str;
}

/// A single open transaction on the target.
#[async_trait]
pub trait TargetTransaction: Send {
    /// Execute a statement, returning the affected row count.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, ExecError>;

    async fn commit(self: Box<Self>) -> Result<(), ExecError>;

    async fn rollback(self: Box<Self>) -> Result<(), ExecError>;
}

/// Reader for source table rows.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Total number of rows in a table.
    async fn row_count(&self, table: &QualifiedName) -> Result<i64, ExecError>;

    /// Fetch one batch. Returns fewer than `batch_size` rows (possibly none)
    /// once the end of the table is reached.
    async fn fetch_batch(&self, request: &BatchRequest) -> Result<Vec<Vec<SqlValue>>, ExecError>;
}
