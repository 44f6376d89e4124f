//! Advisory analysis of the catalog and of a run's execution log.
//!
//! Findings never change the plan or block execution; they are attached to
//! the migration report and printed by `analyze`.

pub mod compatibility;
pub mod performance;

use crate::catalog::Catalog;
use crate::orchestrator::ExecutionLogEntry;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    IncompatibleFeature,
    DataTypeConversion,
    DeprecatedType,
    SyntaxDifference,
    FunctionConversion,
    MissingPrimaryKey,
    MissingIndex,
    ClusteredIndex,
    SlowTransfer,
    Partitioning,
    OversizedColumn,
    Maintenance,
    Configuration,
}

/// One advisory finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub category: Category,
    /// Object the finding is about; `None` for run-wide advice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl Finding {
    pub fn new(
        severity: Severity,
        category: Category,
        object: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            object,
            message: message.into(),
            recommendation: None,
        }
    }

    pub fn recommend(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.severity)?;
        if let Some(object) = &self.object {
            write!(f, "{}: ", object)?;
        }
        f.write_str(&self.message)?;
        if let Some(recommendation) = &self.recommendation {
            write!(f, " ({})", recommendation)?;
        }
        Ok(())
    }
}

/// Pre-migration findings: compatibility plus schema-level performance.
pub fn analyze_catalog(catalog: &Catalog) -> Vec<Finding> {
    let mut findings = compatibility::analyze(catalog);
    findings.extend(performance::analyze_schema(catalog));
    sort(&mut findings);
    findings
}

/// Post-run findings from the execution log.
pub fn analyze_run(catalog: &Catalog, log: &[ExecutionLogEntry]) -> Vec<Finding> {
    let mut findings = performance::analyze_execution(catalog, log);
    sort(&mut findings);
    findings
}

/// Highest severity first, then by object, keeping insertion order otherwise.
fn sort(findings: &mut [Finding]) {
    findings.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.object.cmp(&b.object)));
}
